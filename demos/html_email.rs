//! HTML Email with Inline Images Example
//!
//! This example demonstrates how to:
//! - Send an HTML body together with its plain text alternative
//! - Reference inline images from the HTML with `cid:` URLs
//! - Attach a file read from a directory

use integrations_email::{options, DirFs, Message, Sender, SmtpConfig};

// 1x1 transparent PNG
const LOGO_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sender = SmtpConfig::builder()
        .server_addr("smtp.example.com:587")
        .credentials("user@example.com", "your-password")
        .use_start_tls(true)
        .build()?
        .new_sender()?;

    // Shown by text-only clients
    let text_body = r#"
Welcome to Our Service!

Thank you for signing up. Your welcome guide is attached.

Best regards,
The Team
"#
    .trim();

    let html_body = r#"
<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
    <img src="cid:logo.png" alt="Logo" width="64" height="64">
    <h1>Welcome to Our Service!</h1>
    <p>Thank you for signing up. Your welcome guide is attached.</p>
    <p>Best regards,<br>The Team</p>
</body>
</html>
"#
    .trim();

    // Attachments are read relative to this directory
    let docs = DirFs::new(std::env::var("DOCS_DIR").unwrap_or_else(|_| ".".to_string()));

    let mut opts = vec![
        options::to(["recipient@example.com"]),
        options::set_plain_from_string(text_body),
        options::set_html_from_string(
            html_body,
            [options::inline_from_bytes("logo.png", "image/png", LOGO_PNG)],
        ),
    ];
    if let Ok(guide) = std::env::var("GUIDE_FILE") {
        opts.push(options::attach_from_file(&docs, guide));
    }

    let message = Message::new("Welcome <welcome@example.com>", "Welcome aboard", opts)?;

    println!(
        "Sending HTML email with {} inline image(s) and {} attachment(s)",
        message.html().map_or(0, |html| html.inlines().len()),
        message.attachments().len(),
    );
    sender.send(&message).await?;
    println!("Email sent");

    Ok(())
}

//! Basic Email Sending Example
//!
//! This example demonstrates how to:
//! - Load the SMTP settings from the environment
//! - Build a sender from the configuration
//! - Send a plain text email

use integrations_email::{options, Message, Sender, SmtpConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // SMTP_ADDR, SMTP_USERNAME and SMTP_PASSWORD, plus the optional
    // SMTP_USE_STARTTLS / SMTP_USE_CRAM_MD5 / SMTP_USE_CLEAR switches
    let config = SmtpConfig::from_env()?;
    println!("Sending through {}", config.server_addr);

    let sender = config.new_sender()?;

    let message = Message::new(
        "Sender Name <sender@example.com>",
        "Hello from Rust!",
        [
            options::to(["Recipient Name <recipient@example.com>"]),
            options::cc(["cc@example.com"]),
            options::set_plain_from_string(
                "This is a test email sent with integrations-email.\n\nBest regards,\nThe Team",
            ),
        ],
    )?;

    sender.send(&message).await?;
    println!("Email sent");

    Ok(())
}

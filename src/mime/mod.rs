//! MIME encoding of a [`WireEmail`] (RFC 5322, RFC 2045-2047).
//!
//! Layout:
//! - text and HTML together become `multipart/alternative`
//! - inline attachments wrap the body in `multipart/related`
//! - regular attachments wrap everything in `multipart/mixed`

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::smtp::{WireAttachment, WireEmail};
use crate::types::Address;

/// Length of base64 body lines.
const BASE64_LINE: usize = 76;

/// Bytes of UTF-8 text per RFC 2047 encoded word, keeping each word under
/// 75 characters.
const ENCODED_WORD_BYTES: usize = 45;

/// Content-Transfer-Encoding of a leaf part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    QuotedPrintable,
    Base64,
}

impl TransferEncoding {
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }
}

enum Part<'a> {
    Text(&'a [u8]),
    Html(&'a [u8]),
    Attachment(&'a WireAttachment),
    Multipart(&'static str, Vec<Part<'a>>),
}

/// Renders messages to RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct MimeEncoder {
    date: DateTime<Utc>,
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MimeEncoder {
    /// Creates an encoder stamping messages with the current time.
    pub fn new() -> Self {
        Self { date: Utc::now() }
    }

    /// Uses a fixed `Date` header value.
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    /// Encodes `email`. Bcc recipients never appear in the output.
    pub fn encode(&self, email: &WireEmail) -> SmtpResult<Vec<u8>> {
        let mut out = Vec::new();

        write_header(&mut out, "Date", &self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string())?;
        write_header(&mut out, "From", &encode_address(&email.from))?;
        if !email.to.is_empty() {
            write_header(&mut out, "To", &encode_address_list(&email.to))?;
        }
        if !email.cc.is_empty() {
            write_header(&mut out, "Cc", &encode_address_list(&email.cc))?;
        }
        reject_line_breaks("Subject", &email.subject)?;
        write_header(&mut out, "Subject", &encode_word(&email.subject))?;
        write_header(&mut out, "Message-ID", &self.message_id(email))?;
        write_header(&mut out, "MIME-Version", "1.0")?;

        write_part(&mut out, &structure(email))?;
        Ok(out)
    }

    fn message_id(&self, email: &WireEmail) -> String {
        let domain = Address::parse(&email.from)
            .ok()
            .and_then(|a| a.email().split_once('@').map(|(_, d)| d.to_string()))
            .unwrap_or_else(|| "localhost".to_string());
        format!("<{}.{}@{}>", Uuid::new_v4().simple(), self.date.timestamp(), domain)
    }

    /// Dot-stuffs `encoded` and appends the `<CRLF>.<CRLF>` terminator.
    pub fn prepare_data_content(encoded: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 64 + 5);
        let mut at_line_start = true;

        for &byte in encoded {
            if at_line_start && byte == b'.' {
                out.push(b'.');
            }
            out.push(byte);
            at_line_start = byte == b'\n';
        }

        if !out.ends_with(b"\r\n") {
            if out.ends_with(b"\n") {
                out.pop();
            }
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
        out
    }
}

fn structure(email: &WireEmail) -> Part<'_> {
    let body = match (&email.text, &email.html) {
        (Some(text), Some(html)) => Part::Multipart(
            "alternative",
            vec![Part::Text(text), Part::Html(html)],
        ),
        (None, Some(html)) => Part::Html(html),
        (Some(text), None) => Part::Text(text),
        (None, None) => Part::Text(&[]),
    };

    let (inline, regular): (Vec<_>, Vec<_>) = email.attachments.iter().partition(|a| a.inline);

    let body = if inline.is_empty() {
        body
    } else {
        let mut parts = vec![body];
        parts.extend(inline.into_iter().map(Part::Attachment));
        Part::Multipart("related", parts)
    };

    if regular.is_empty() {
        body
    } else {
        let mut parts = vec![body];
        parts.extend(regular.into_iter().map(Part::Attachment));
        Part::Multipart("mixed", parts)
    }
}

fn write_part(out: &mut Vec<u8>, part: &Part<'_>) -> SmtpResult<()> {
    match part {
        Part::Text(body) => write_text(out, "text/plain; charset=utf-8", body),
        Part::Html(body) => write_text(out, "text/html; charset=utf-8", body),
        Part::Attachment(a) => write_attachment(out, a),
        Part::Multipart(subtype, parts) => {
            let boundary = format!("----=_Part_{}", Uuid::new_v4().simple());
            write_header(
                out,
                "Content-Type",
                &format!("multipart/{}; boundary=\"{}\"", subtype, boundary),
            )?;
            out.extend_from_slice(b"\r\n");
            for part in parts {
                out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
                write_part(out, part)?;
            }
            out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
            Ok(())
        }
    }
}

fn write_text(out: &mut Vec<u8>, content_type: &str, body: &[u8]) -> SmtpResult<()> {
    write_header(out, "Content-Type", content_type)?;
    write_header(
        out,
        "Content-Transfer-Encoding",
        TransferEncoding::QuotedPrintable.header_value(),
    )?;
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&quoted_printable::encode(body));
    out.extend_from_slice(b"\r\n");
    Ok(())
}

fn write_attachment(out: &mut Vec<u8>, attachment: &WireAttachment) -> SmtpResult<()> {
    let filename = quote_param(&attachment.filename);
    write_header(
        out,
        "Content-Type",
        &format!("{}; name={}", attachment.content_type, filename),
    )?;
    write_header(
        out,
        "Content-Transfer-Encoding",
        TransferEncoding::Base64.header_value(),
    )?;
    if attachment.inline {
        write_header(out, "Content-ID", &format!("<{}>", attachment.filename))?;
        write_header(out, "Content-Disposition", &format!("inline; filename={}", filename))?;
    } else {
        write_header(out, "Content-Disposition", &format!("attachment; filename={}", filename))?;
    }
    out.extend_from_slice(b"\r\n");

    let encoded = BASE64.encode(&attachment.content);
    for line in encoded.as_bytes().chunks(BASE64_LINE) {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    Ok(())
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
    reject_line_breaks(name, value)?;
    out.extend_from_slice(fold(&format!("{}: {}", name, value)).as_bytes());
    out.extend_from_slice(b"\r\n");
    Ok(())
}

fn reject_line_breaks(name: &str, value: &str) -> SmtpResult<()> {
    if value.contains(&['\r', '\n'][..]) {
        return Err(SmtpError::new(
            SmtpErrorKind::InvalidHeader,
            format!("line break in {} header", name),
        ));
    }
    Ok(())
}

/// Folds a header line at whitespace so lines stay under 78 characters where
/// possible.
fn fold(line: &str) -> String {
    if line.len() <= 78 {
        return line.to_string();
    }

    let mut folded = String::with_capacity(line.len() + 8);
    let mut current = 0;
    for (i, word) in line.split(' ').enumerate() {
        if i == 0 {
            folded.push_str(word);
            current = word.len();
        } else if current + 1 + word.len() <= 76 {
            folded.push(' ');
            folded.push_str(word);
            current += 1 + word.len();
        } else {
            folded.push_str("\r\n ");
            folded.push_str(word);
            current = 1 + word.len();
        }
    }
    folded
}

/// RFC 2047 `B` encoding for non-ASCII text, split into encoded words at
/// character boundaries.
fn encode_word(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    for (i, c) in value.char_indices() {
        if i + c.len_utf8() - start > ENCODED_WORD_BYTES {
            words.push(&value[start..i]);
            start = i;
        }
    }
    words.push(&value[start..]);

    words
        .into_iter()
        .map(|w| format!("=?UTF-8?B?{}?=", BASE64.encode(w)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn encode_address(raw: &str) -> String {
    match Address::parse(raw) {
        Ok(addr) => match addr.name() {
            Some(name) if !name.is_ascii() => format!("{} <{}>", encode_word(name), addr.email()),
            _ => addr.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

fn encode_address_list(list: &[String]) -> String {
    list.iter()
        .map(|a| encode_address(a))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_param(value: &str) -> String {
    if value.is_ascii() {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        format!("\"{}\"", encode_word(value))
    }
}

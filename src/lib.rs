//! # Email Integration Library
//!
//! Compose email messages and deliver them over SMTP:
//! - Messages built from functional options, with plain and HTML bodies,
//!   inline resources and attachments copied in at construction time
//! - Bodies rendered from templates (tera)
//! - Attachments read from any [`FileSystem`]
//! - Delivery over plain SMTP, implicit TLS or STARTTLS with PLAIN or
//!   CRAM-MD5 authentication
//! - A [`MockSender`] that counts sends and runs validators in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_email::{options, Message, Sender, SmtpConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sender = SmtpConfig::builder()
//!         .server_addr("smtp.example.com:587")
//!         .credentials("user@example.com", "password")
//!         .build()?
//!         .new_sender()?;
//!
//!     let message = Message::new(
//!         "Sender <sender@example.com>",
//!         "Hello from Rust!",
//!         [
//!             options::to(["recipient@example.com"]),
//!             options::set_plain_from_string("This is a test email."),
//!         ],
//!     )?;
//!
//!     sender.send(&message).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

// Message model
pub mod errors;
pub mod fs;
pub mod options;
pub mod pool;
pub mod template;
pub mod types;

// Sending
pub mod config;
pub mod mocks;
pub mod sender;
pub mod smtp;

// SMTP client
pub mod auth;
pub mod client;
pub mod mime;
pub mod protocol;
pub mod transport;

pub use auth::Auth;
pub use client::SmtpClient;
pub use config::{ClientOptions, SmtpConfig, SmtpConfigBuilder, TlsSettings};
pub use errors::{EmailError, EmailResult, SmtpError, SmtpErrorKind, SmtpResult};
pub use fs::{DirFs, FileSystem, MemoryFs};
pub use mocks::{MockOpt, MockSender, Validator};
pub use options::{HtmlOpt, MessageBuilder, MessageOpt};
pub use pool::BufferPool;
pub use sender::Sender;
pub use smtp::{Delivery, DeliveryMode, SmtpSender, WireAttachment, WireEmail};
pub use template::{Template, TemplateSet};
pub use types::{Address, Attachment, HtmlBody, Message};

//! Error types for message composition and delivery.
//!
//! [`EmailError`] is what every public operation returns. Its variants are
//! transparent: an I/O failure while reading an attachment, a template
//! execution failure or a delivery failure surfaces exactly as the
//! underlying error reported it.
//!
//! [`SmtpError`] is produced by the SMTP delivery path and carries the reply
//! code and enhanced status code when the server supplied them.

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for composition and sending.
pub type EmailResult<T> = Result<T, EmailError>;

/// Result type for SMTP delivery operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Shared, cheaply cloneable caller error.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Error returned by message construction and by [`Sender`](crate::Sender)s.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Reading a body, attachment or file failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Template execution failed.
    #[error(transparent)]
    Template(#[from] tera::Error),

    /// SMTP delivery failed.
    #[error(transparent)]
    Smtp(#[from] SmtpError),

    /// Error supplied by caller code (option closures, validators, mocks).
    #[error(transparent)]
    Other(SharedError),
}

impl EmailError {
    /// Wraps an arbitrary error.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EmailError::Other(Arc::new(error))
    }

    /// Creates an error carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::other(ErrorMessage(message.into()))
    }

    /// Returns the SMTP error if this is a delivery failure.
    pub fn as_smtp(&self) -> Option<&SmtpError> {
        match self {
            EmailError::Smtp(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SharedError> for EmailError {
    fn from(error: SharedError) -> Self {
        EmailError::Other(error)
    }
}

/// Plain message error used by [`EmailError::msg`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ErrorMessage(pub String);

/// SMTP error kinds categorizing delivery failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Connection errors
    /// Connection was refused.
    ConnectionRefused,
    /// Connection was reset or closed by the server.
    ConnectionReset,
    /// Connecting took too long.
    ConnectTimeout,
    /// Reading a reply took too long.
    ReadTimeout,
    /// Writing a command took too long.
    WriteTimeout,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// Server name cannot be used for TLS verification.
    InvalidServerName,
    /// STARTTLS not advertised by the server.
    StarttlsNotSupported,

    // Authentication errors
    /// Credentials were rejected.
    CredentialsInvalid,
    /// The server does not offer authentication.
    AuthMethodNotSupported,
    /// PLAIN credentials would travel over an unencrypted connection.
    InsecureAuth,
    /// The auth host does not match the server being talked to.
    AuthHostMismatch,

    // Protocol errors
    /// Malformed reply from the server.
    InvalidResponse,
    /// Reply code not expected at this point of the conversation.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,

    // Message errors
    /// Invalid sender address.
    InvalidFromAddress,
    /// Invalid or missing recipient address.
    InvalidRecipientAddress,
    /// Message rejected for size.
    MessageTooLarge,
    /// Header name or value cannot be encoded.
    InvalidHeader,

    // Configuration errors
    /// Configuration is invalid or incomplete.
    ConfigurationInvalid,

    /// Unknown or internal error.
    Unknown,
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmtpErrorKind::ConnectionRefused => "Connection refused",
            SmtpErrorKind::ConnectionReset => "Connection reset",
            SmtpErrorKind::ConnectTimeout => "Connect timeout",
            SmtpErrorKind::ReadTimeout => "Read timeout",
            SmtpErrorKind::WriteTimeout => "Write timeout",
            SmtpErrorKind::TlsHandshakeFailed => "TLS handshake failed",
            SmtpErrorKind::InvalidServerName => "Invalid TLS server name",
            SmtpErrorKind::StarttlsNotSupported => "STARTTLS not supported",
            SmtpErrorKind::CredentialsInvalid => "Invalid credentials",
            SmtpErrorKind::AuthMethodNotSupported => "Auth not supported",
            SmtpErrorKind::InsecureAuth => "Unencrypted connection",
            SmtpErrorKind::AuthHostMismatch => "Wrong host name",
            SmtpErrorKind::InvalidResponse => "Invalid server response",
            SmtpErrorKind::UnexpectedResponse => "Unexpected response",
            SmtpErrorKind::ServerShutdown => "Server shutting down",
            SmtpErrorKind::InvalidFromAddress => "Invalid sender address",
            SmtpErrorKind::InvalidRecipientAddress => "Invalid recipient address",
            SmtpErrorKind::MessageTooLarge => "Message too large",
            SmtpErrorKind::InvalidHeader => "Invalid header",
            SmtpErrorKind::ConfigurationInvalid => "Invalid configuration",
            SmtpErrorKind::Unknown => "Unknown error",
        };
        f.write_str(s)
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code such as `5.1.1`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() || !(2..=5).contains(&code.class) {
            return None;
        }
        Some(code)
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// SMTP delivery error.
#[derive(Error, Debug)]
pub struct SmtpError {
    kind: SmtpErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new SMTP error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::CredentialsInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            500..=503 => SmtpErrorKind::InvalidResponse,
            530 | 534 | 538 => SmtpErrorKind::AuthMethodNotSupported,
            535 => SmtpErrorKind::CredentialsInvalid,
            550 | 551 => SmtpErrorKind::InvalidRecipientAddress,
            552 => SmtpErrorKind::MessageTooLarge,
            553 => SmtpErrorKind::InvalidFromAddress,
            400..=599 => SmtpErrorKind::UnexpectedResponse,
            _ => SmtpErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

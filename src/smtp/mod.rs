//! SMTP-backed [`Sender`].
//!
//! [`SmtpSender`] converts a [`Message`] into a [`WireEmail`] and hands it to
//! a [`Delivery`] implementation, picking plain, TLS or STARTTLS delivery
//! from its settings. [`SmtpClient`] is the default delivery.

use std::fmt;

use async_trait::async_trait;

use crate::auth::Auth;
use crate::client::SmtpClient;
use crate::config::TlsSettings;
use crate::errors::{EmailResult, SmtpResult};
use crate::sender::Sender;
use crate::types::Message;

/// Message in the shape handed to a [`Delivery`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireEmail {
    pub from: String,
    /// Envelope sender overriding `from` in `MAIL FROM`.
    pub sender: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: Option<Vec<u8>>,
    pub html: Option<Vec<u8>>,
    /// Inline attachments first, then regular ones.
    pub attachments: Vec<WireAttachment>,
}

/// Attachment in a [`WireEmail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
    /// Referenced from the HTML body as `cid:<filename>`.
    pub inline: bool,
}

impl WireEmail {
    /// Converts `message`, copying recipients in order.
    pub fn from_message(message: &Message, sender: Option<&str>) -> Self {
        let inlines = message
            .html()
            .map(|html| html.inlines())
            .unwrap_or_default()
            .iter()
            .map(|a| (a, true));
        let regular = message.attachments().iter().map(|a| (a, false));

        let attachments = inlines
            .chain(regular)
            .map(|(a, inline)| WireAttachment {
                filename: a.name().to_string(),
                content_type: a.content_type().to_string(),
                content: a.body().to_vec(),
                inline,
            })
            .collect();

        Self {
            from: message.from().to_string(),
            sender: sender.map(str::to_string),
            to: message.to().to_vec(),
            cc: message.cc().to_vec(),
            bcc: message.bcc().to_vec(),
            subject: message.subject().to_string(),
            text: message.plain().map(<[u8]>::to_vec),
            html: message.html().map(|h| h.body().to_vec()),
            attachments,
        }
    }

    /// Address used in `MAIL FROM`.
    pub fn envelope_sender(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.from)
    }

    /// Every envelope recipient: to, then cc, then bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}

/// SMTP delivery capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Delivers without encryption.
    async fn send_plain(&self, addr: &str, auth: &Auth, email: &WireEmail) -> SmtpResult<()>;

    /// Delivers over a connection that is TLS from the first byte.
    async fn send_with_tls(
        &self,
        addr: &str,
        auth: &Auth,
        email: &WireEmail,
        tls: &TlsSettings,
    ) -> SmtpResult<()>;

    /// Delivers after upgrading a plain connection with STARTTLS.
    async fn send_with_starttls(
        &self,
        addr: &str,
        auth: &Auth,
        email: &WireEmail,
        tls: &TlsSettings,
    ) -> SmtpResult<()>;
}

/// How [`SmtpSender`] reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Plain,
    Tls,
    StartTls,
}

/// [`Sender`] delivering through SMTP.
pub struct SmtpSender<D = SmtpClient> {
    addr: String,
    auth: Auth,
    delivery: D,
    sender: Option<String>,
    tls: Option<TlsSettings>,
    start_tls: bool,
}

impl SmtpSender<SmtpClient> {
    /// Creates a sender for `addr` (`host:port`) using the default client.
    pub fn new(addr: impl Into<String>, auth: Auth) -> Self {
        Self::with_delivery(addr, auth, SmtpClient::default())
    }
}

impl<D: Delivery> SmtpSender<D> {
    /// Creates a sender backed by a custom delivery.
    pub fn with_delivery(addr: impl Into<String>, auth: Auth, delivery: D) -> Self {
        Self {
            addr: addr.into(),
            auth,
            delivery,
            sender: None,
            tls: None,
            start_tls: false,
        }
    }

    /// Overrides the envelope sender.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Enables TLS.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Uses STARTTLS instead of a direct TLS connection. Has no effect
    /// without [`with_tls`](Self::with_tls).
    pub fn with_start_tls(mut self, start_tls: bool) -> Self {
        self.start_tls = start_tls;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    pub fn start_tls(&self) -> bool {
        self.start_tls
    }

    pub fn mode(&self) -> DeliveryMode {
        match (&self.tls, self.start_tls) {
            (None, _) => DeliveryMode::Plain,
            (Some(_), false) => DeliveryMode::Tls,
            (Some(_), true) => DeliveryMode::StartTls,
        }
    }
}

impl<D> fmt::Debug for SmtpSender<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSender")
            .field("addr", &self.addr)
            .field("auth", &self.auth)
            .field("sender", &self.sender)
            .field("tls", &self.tls)
            .field("start_tls", &self.start_tls)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D: Delivery> Sender for SmtpSender<D> {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        let email = WireEmail::from_message(message, self.sender.as_deref());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            addr = %self.addr,
            mode = ?self.mode(),
            recipients = email.recipients().count(),
            attachments = email.attachments.len(),
            "sending message over SMTP"
        );

        let result = match &self.tls {
            None => self.delivery.send_plain(&self.addr, &self.auth, &email).await,
            Some(tls) if self.start_tls => {
                self.delivery
                    .send_with_starttls(&self.addr, &self.auth, &email, tls)
                    .await
            }
            Some(tls) => {
                self.delivery
                    .send_with_tls(&self.addr, &self.auth, &email, tls)
                    .await
            }
        };
        Ok(result?)
    }
}

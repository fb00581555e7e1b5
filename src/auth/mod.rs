//! SMTP authentication.
//!
//! Supports:
//! - PLAIN (RFC 4616), only over TLS or to a local server
//! - CRAM-MD5 (RFC 2195)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

type HmacMd5 = Hmac<Md5>;

/// Credentials presented to the server.
#[derive(Clone)]
pub enum Auth {
    /// PLAIN authentication.
    Plain {
        /// Authorization identity; usually empty to act as `username`.
        identity: String,
        username: String,
        password: SecretString,
        /// Host the credentials are meant for. Authentication is refused if
        /// the connected server has a different name.
        host: String,
    },
    /// CRAM-MD5 challenge-response.
    CramMd5 {
        username: String,
        secret: SecretString,
    },
}

/// What the client knows about the server when authenticating.
#[derive(Debug, Clone, Copy)]
pub struct ServerInfo<'a> {
    /// Host name the client connected to.
    pub name: &'a str,
    /// Whether the connection is encrypted.
    pub tls: bool,
}

impl Auth {
    /// Creates PLAIN credentials.
    pub fn plain(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Auth::Plain {
            identity: identity.into(),
            username: username.into(),
            password: SecretString::new(password.into()),
            host: host.into(),
        }
    }

    /// Creates CRAM-MD5 credentials.
    pub fn cram_md5(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Auth::CramMd5 {
            username: username.into(),
            secret: SecretString::new(secret.into()),
        }
    }

    /// SMTP AUTH mechanism name.
    pub fn mechanism(&self) -> &'static str {
        match self {
            Auth::Plain { .. } => "PLAIN",
            Auth::CramMd5 { .. } => "CRAM-MD5",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Auth::Plain { username, .. } | Auth::CramMd5 { username, .. } => username,
        }
    }

    /// Checks the server is acceptable and returns the base64 initial
    /// response sent with `AUTH`, if the mechanism has one.
    pub fn start(&self, server: ServerInfo<'_>) -> SmtpResult<Option<String>> {
        match self {
            Auth::Plain {
                identity,
                username,
                password,
                host,
            } => {
                if !server.tls && !is_localhost(server.name) {
                    return Err(SmtpError::new(
                        SmtpErrorKind::InsecureAuth,
                        "refusing PLAIN authentication over an unencrypted connection",
                    ));
                }
                if server.name != host {
                    return Err(SmtpError::new(
                        SmtpErrorKind::AuthHostMismatch,
                        format!("credentials for {} offered to {}", host, server.name),
                    ));
                }
                let response = format!("{}\0{}\0{}", identity, username, password.expose_secret());
                Ok(Some(BASE64.encode(response)))
            }
            Auth::CramMd5 { .. } => Ok(None),
        }
    }

    /// Answers a base64 server challenge.
    pub fn respond(&self, challenge: &str) -> SmtpResult<String> {
        match self {
            Auth::CramMd5 { username, secret } => {
                let challenge = BASE64.decode(challenge.trim()).map_err(|e| {
                    SmtpError::authentication(format!("invalid CRAM-MD5 challenge: {}", e))
                })?;
                let mut mac = HmacMd5::new_from_slice(secret.expose_secret().as_bytes())
                    .map_err(|e| SmtpError::authentication(format!("HMAC error: {}", e)))?;
                mac.update(&challenge);
                let digest: String = mac
                    .finalize()
                    .into_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect();
                Ok(BASE64.encode(format!("{} {}", username, digest)))
            }
            Auth::Plain { .. } => Err(SmtpError::authentication(
                "unexpected server challenge during PLAIN authentication",
            )),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Plain {
                identity,
                username,
                host,
                ..
            } => f
                .debug_struct("Plain")
                .field("identity", identity)
                .field("username", username)
                .field("password", &"[REDACTED]")
                .field("host", host)
                .finish(),
            Auth::CramMd5 { username, .. } => f
                .debug_struct("CramMd5")
                .field("username", username)
                .field("secret", &"[REDACTED]")
                .finish(),
        }
    }
}

fn is_localhost(name: &str) -> bool {
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

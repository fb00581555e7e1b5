//! SMTP commands, replies and ESMTP extensions (RFC 5321).

use std::collections::HashMap;
use std::fmt;

use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// Client commands used during delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    StartTls,
    /// `AUTH <mechanism> [initial-response]`.
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    /// Bare line answering a 334 challenge.
    AuthResponse(String),
    /// `MAIL FROM:<path>`, with `BODY=8BITMIME` when `body_8bit` is set.
    MailFrom { address: String, body_8bit: bool },
    RcptTo(String),
    Data,
    Quit,
}

impl SmtpCommand {
    /// Formats the command line without the trailing CRLF.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {}", mechanism, response),
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {}", mechanism),
            SmtpCommand::AuthResponse(response) => response.clone(),
            SmtpCommand::MailFrom { address, body_8bit } => {
                if *body_8bit {
                    format!("MAIL FROM:{} BODY=8BITMIME", address)
                } else {
                    format!("MAIL FROM:{}", address)
                }
            }
            SmtpCommand::RcptTo(address) => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Whether the command line carries credentials.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            SmtpCommand::Auth {
                initial_response: Some(_),
                ..
            } | SmtpCommand::AuthResponse(_)
        )
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth { mechanism, .. } if self.is_sensitive() => {
                write!(f, "AUTH {} <redacted>", mechanism)
            }
            SmtpCommand::AuthResponse(_) => f.write_str("<redacted>"),
            _ => f.write_str(&self.to_smtp_string()),
        }
    }
}

/// Server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    pub code: u16,
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Text of each reply line, without code and separator.
    pub lines: Vec<String>,
}

impl SmtpResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            lines: vec![message.into()],
        }
    }

    /// Parses the raw lines of one reply, multiline replies included.
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("empty reply"));
        }

        let mut code = 0u16;
        let mut enhanced_code = None;
        let mut text = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let parsed: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("malformed reply line: {:?}", line)))?;

            if i == 0 {
                code = parsed;
            } else if parsed != code {
                return Err(SmtpError::protocol("inconsistent codes in multiline reply"));
            }

            let mut message = line.get(4..).unwrap_or("");
            if i == 0 {
                if let Some((esc, rest)) = message
                    .split_once(' ')
                    .and_then(|(first, rest)| EnhancedStatusCode::parse(first).map(|c| (c, rest)))
                {
                    enhanced_code = Some(esc);
                    message = rest.trim_start();
                }
            }
            text.push(message.to_string());
        }

        Ok(Self {
            code,
            enhanced_code,
            lines: text,
        })
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Converts the reply into the matching delivery error.
    pub fn into_error(self) -> SmtpError {
        let err = SmtpError::from_smtp_response(self.code, self.message());
        match self.enhanced_code {
            Some(code) => err.with_enhanced_code(code),
            None => err,
        }
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_line())
    }
}

/// Extensions advertised in an `EHLO` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsmtpCapabilities {
    /// Keyword (upper-cased) to parameter string.
    extensions: HashMap<String, String>,
}

impl EsmtpCapabilities {
    /// Parses an `EHLO` reply; the first line is the server greeting.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let extensions = response
            .lines
            .iter()
            .skip(1)
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                let (keyword, params) = line.split_once(' ').unwrap_or((line, ""));
                Some((keyword.to_ascii_uppercase(), params.trim().to_string()))
            })
            .collect();
        Self { extensions }
    }

    /// Whether `keyword` was advertised (case-insensitive).
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions.contains_key(&keyword.to_ascii_uppercase())
    }

    pub fn starttls(&self) -> bool {
        self.supports("STARTTLS")
    }

    pub fn eight_bit_mime(&self) -> bool {
        self.supports("8BITMIME")
    }

    /// Advertised `AUTH` mechanisms, upper-cased.
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.extensions
            .get("AUTH")
            .map(|p| p.split_whitespace().map(str::to_ascii_uppercase).collect())
            .unwrap_or_default()
    }

    /// Maximum message size from `SIZE`, if advertised with a value.
    pub fn size(&self) -> Option<usize> {
        self.extensions.get("SIZE").and_then(|p| p.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

/// Reply codes the client checks for.
pub mod codes {
    pub const SERVICE_READY: u16 = 220;
    pub const SERVICE_CLOSING: u16 = 221;
    pub const AUTH_SUCCESS: u16 = 235;
    pub const OK: u16 = 250;
    pub const AUTH_CONTINUE: u16 = 334;
    pub const START_MAIL_INPUT: u16 = 354;
}

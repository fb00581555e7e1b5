//! Async SMTP client used as the default [`Delivery`].
//!
//! Each delivery opens one connection, runs a single mail transaction and
//! closes it again:
//! - greeting, `EHLO` (or `HELO` for servers without ESMTP)
//! - optional STARTTLS upgrade
//! - authentication when the server speaks ESMTP
//! - `MAIL FROM`, `RCPT TO`, `DATA`, `QUIT`

use async_trait::async_trait;

use crate::auth::{Auth, ServerInfo};
use crate::config::{split_host_port, ClientOptions, TlsSettings};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::MimeEncoder;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::smtp::{Delivery, WireEmail};
use crate::transport::Connection;
use crate::types::Address;

/// SMTP client delivering one message per connection.
#[derive(Debug, Clone, Default)]
pub struct SmtpClient {
    options: ClientOptions,
}

/// How the connection is secured.
#[derive(Clone, Copy)]
enum Security<'a> {
    Clear,
    Tls(&'a TlsSettings),
    StartTls(&'a TlsSettings),
}

impl SmtpClient {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    async fn deliver(
        &self,
        addr: &str,
        auth: &Auth,
        email: &WireEmail,
        security: Security<'_>,
    ) -> SmtpResult<()> {
        let (from, recipients) = envelope(email)?;
        let data = MimeEncoder::prepare_data_content(&MimeEncoder::new().encode(email)?);

        let mut conn = Connection::connect(
            addr,
            self.options.connect_timeout,
            self.options.command_timeout,
        )
        .await?;
        if let Security::Tls(tls) = security {
            conn = conn.upgrade(tls).await?;
        }

        let greeting = conn.read_response().await?;
        expect(greeting, codes::SERVICE_READY)?;
        let mut capabilities = self.hello(&mut conn).await?;

        if let Security::StartTls(tls) = security {
            if !capabilities.as_ref().is_some_and(EsmtpCapabilities::starttls) {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    "server does not advertise STARTTLS",
                ));
            }
            let response = conn.send_command(&SmtpCommand::StartTls).await?;
            expect(response, codes::SERVICE_READY)?;
            conn = conn.upgrade(tls).await?;
            capabilities = self.hello(&mut conn).await?;
        }

        self.transaction(&mut conn, addr, auth, capabilities.as_ref(), &from, &recipients, &data)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn transaction(
        &self,
        conn: &mut Connection,
        addr: &str,
        auth: &Auth,
        capabilities: Option<&EsmtpCapabilities>,
        from: &Address,
        recipients: &[Address],
        data: &[u8],
    ) -> SmtpResult<()> {
        if let Some(capabilities) = capabilities {
            check_size(capabilities, data)?;
            let host = split_host_port(addr).map(|(host, _)| host).unwrap_or(addr);
            authenticate(conn, auth, capabilities, host).await?;
        }

        let mail_from = SmtpCommand::MailFrom {
            address: from.to_smtp(),
            body_8bit: capabilities.is_some_and(EsmtpCapabilities::eight_bit_mime),
        };
        let response = conn.send_command(&mail_from).await?;
        expect(response, codes::OK)?;

        for recipient in recipients {
            let response = conn
                .send_command(&SmtpCommand::RcptTo(recipient.to_smtp()))
                .await?;
            if !response.is_success() {
                #[cfg(feature = "tracing")]
                tracing::warn!(recipient = %recipient, code = response.code, "recipient rejected");
                return Err(response.into_error());
            }
        }

        let response = conn.send_command(&SmtpCommand::Data).await?;
        expect(response, codes::START_MAIL_INPUT)?;
        conn.send_data(data).await?;
        let response = conn.read_response().await?;
        expect(response, codes::OK)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            from = %from,
            recipients = recipients.len(),
            bytes = data.len(),
            "message accepted"
        );

        // The message is already accepted; a failed QUIT does not undo that.
        match conn.send_command(&SmtpCommand::Quit).await {
            Ok(response) if response.code == codes::SERVICE_CLOSING => {}
            Ok(_response) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(code = _response.code, "unexpected reply to QUIT");
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_e, "QUIT failed");
            }
        }
        conn.shutdown().await;
        Ok(())
    }

    /// Sends `EHLO`, falling back to `HELO`.
    ///
    /// Returns `None` when the server only accepted `HELO`.
    async fn hello(&self, conn: &mut Connection) -> SmtpResult<Option<EsmtpCapabilities>> {
        let name = self.options.hello_name.clone();
        let response = conn.send_command(&SmtpCommand::Ehlo(name.clone())).await?;
        if response.is_success() {
            return Ok(Some(EsmtpCapabilities::from_ehlo_response(&response)));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, "EHLO refused, falling back to HELO");

        let response = conn.send_command(&SmtpCommand::Helo(name)).await?;
        expect(response, codes::OK)?;
        Ok(None)
    }
}

#[async_trait]
impl Delivery for SmtpClient {
    async fn send_plain(&self, addr: &str, auth: &Auth, email: &WireEmail) -> SmtpResult<()> {
        self.deliver(addr, auth, email, Security::Clear).await
    }

    async fn send_with_tls(
        &self,
        addr: &str,
        auth: &Auth,
        email: &WireEmail,
        tls: &TlsSettings,
    ) -> SmtpResult<()> {
        self.deliver(addr, auth, email, Security::Tls(tls)).await
    }

    async fn send_with_starttls(
        &self,
        addr: &str,
        auth: &Auth,
        email: &WireEmail,
        tls: &TlsSettings,
    ) -> SmtpResult<()> {
        self.deliver(addr, auth, email, Security::StartTls(tls)).await
    }
}

/// Validates and parses the envelope sender and recipients.
fn envelope(email: &WireEmail) -> SmtpResult<(Address, Vec<Address>)> {
    let sender = email.envelope_sender();
    reject_line_breaks(sender)?;
    let from = Address::parse_as(sender, SmtpErrorKind::InvalidFromAddress)?;

    let recipients = email
        .recipients()
        .map(|rcpt| {
            reject_line_breaks(rcpt)?;
            Address::parse(rcpt)
        })
        .collect::<SmtpResult<Vec<_>>>()?;
    if recipients.is_empty() {
        return Err(SmtpError::new(
            SmtpErrorKind::InvalidRecipientAddress,
            "message has no recipients",
        ));
    }
    Ok((from, recipients))
}

fn reject_line_breaks(line: &str) -> SmtpResult<()> {
    if line.contains(&['\r', '\n'][..]) {
        return Err(SmtpError::new(
            SmtpErrorKind::InvalidHeader,
            "a line must not contain CR or LF",
        ));
    }
    Ok(())
}

/// Rejects messages above the advertised `SIZE` limit; zero means no limit.
fn check_size(capabilities: &EsmtpCapabilities, data: &[u8]) -> SmtpResult<()> {
    match capabilities.size() {
        Some(max) if max > 0 && data.len() > max => Err(SmtpError::new(
            SmtpErrorKind::MessageTooLarge,
            format!("message is {} bytes, server accepts at most {}", data.len(), max),
        )),
        _ => Ok(()),
    }
}

/// Runs the `AUTH` exchange.
async fn authenticate(
    conn: &mut Connection,
    auth: &Auth,
    capabilities: &EsmtpCapabilities,
    host: &str,
) -> SmtpResult<()> {
    if !capabilities.supports("AUTH") {
        return Err(SmtpError::new(
            SmtpErrorKind::AuthMethodNotSupported,
            "server does not support AUTH",
        ));
    }
    let mechanisms = capabilities.auth_mechanisms();
    if !mechanisms.iter().any(|m| m == auth.mechanism()) {
        return Err(SmtpError::new(
            SmtpErrorKind::AuthMethodNotSupported,
            format!("server offers {:?}, not {}", mechanisms, auth.mechanism()),
        ));
    }

    let initial_response = auth.start(ServerInfo {
        name: host,
        tls: conn.is_tls(),
    })?;

    #[cfg(feature = "tracing")]
    tracing::debug!(mechanism = auth.mechanism(), username = auth.username(), "authenticating");

    let mut response = conn
        .send_command(&SmtpCommand::Auth {
            mechanism: auth.mechanism().to_string(),
            initial_response,
        })
        .await?;

    while response.code == codes::AUTH_CONTINUE {
        let answer = match auth.respond(response.first_line()) {
            Ok(answer) => answer,
            Err(e) => {
                // Cancel the exchange before reporting the local failure.
                let _ = conn.send_command(&SmtpCommand::AuthResponse("*".to_string())).await;
                return Err(e);
            }
        };
        response = conn.send_command(&SmtpCommand::AuthResponse(answer)).await?;
    }

    expect(response, codes::AUTH_SUCCESS).map(|_| ())
}

/// Accepts `response` only when it carries `code`.
fn expect(response: SmtpResponse, code: u16) -> SmtpResult<SmtpResponse> {
    if response.code == code {
        return Ok(response);
    }
    if response.code >= 400 {
        return Err(response.into_error());
    }
    Err(SmtpError::new(
        SmtpErrorKind::UnexpectedResponse,
        format!("expected {}, got {}", code, response),
    )
    .with_smtp_code(response.code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// How the scripted server answers.
    #[derive(Clone, Default)]
    struct Script {
        /// Extension lines after the EHLO greeting; `None` refuses EHLO.
        ehlo: Option<Vec<&'static str>>,
        /// Base64 challenge sent in answer to `AUTH CRAM-MD5`.
        challenge: Option<&'static str>,
    }

    #[derive(Debug, Default)]
    struct Transcript {
        commands: Vec<String>,
        data: String,
    }

    async fn start(script: Script) -> (String, tokio::task::JoinHandle<Transcript>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, script).await
        });
        (addr, handle)
    }

    async fn serve(stream: tokio::net::TcpStream, script: Script) -> Transcript {
        let mut stream = BufReader::new(stream);
        let mut transcript = Transcript::default();
        stream.get_mut().write_all(b"220 mail.example.com ESMTP\r\n").await.unwrap();

        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            transcript.commands.push(line.clone());
            let upper = line.to_ascii_uppercase();

            let reply = if upper.starts_with("EHLO") {
                match &script.ehlo {
                    None => "502 5.5.1 not implemented\r\n".to_string(),
                    Some(extensions) => {
                        let mut reply = String::new();
                        let mut lines = vec!["mail.example.com"];
                        lines.extend(extensions);
                        for (i, l) in lines.iter().enumerate() {
                            let sep = if i + 1 == lines.len() { ' ' } else { '-' };
                            reply.push_str(&format!("250{}{}\r\n", sep, l));
                        }
                        reply
                    }
                }
            } else if upper.starts_with("HELO") {
                "250 mail.example.com\r\n".to_string()
            } else if upper.starts_with("AUTH CRAM-MD5") {
                let challenge = script.challenge.unwrap_or("");
                stream
                    .get_mut()
                    .write_all(format!("334 {}\r\n", challenge).as_bytes())
                    .await
                    .unwrap();
                let mut answer = String::new();
                stream.read_line(&mut answer).await.unwrap();
                transcript.commands.push(answer.trim_end().to_string());
                "235 2.7.0 authenticated\r\n".to_string()
            } else if upper.starts_with("AUTH") {
                "235 2.7.0 authenticated\r\n".to_string()
            } else if upper.starts_with("MAIL") {
                "250 2.1.0 ok\r\n".to_string()
            } else if upper.starts_with("RCPT") {
                if upper.contains("REJECT") {
                    "550 5.1.1 no such user\r\n".to_string()
                } else {
                    "250 2.1.5 ok\r\n".to_string()
                }
            } else if upper == "DATA" {
                stream.get_mut().write_all(b"354 go ahead\r\n").await.unwrap();
                loop {
                    let mut data = String::new();
                    if stream.read_line(&mut data).await.unwrap() == 0 || data == ".\r\n" {
                        break;
                    }
                    transcript.data.push_str(&data);
                }
                "250 2.0.0 queued\r\n".to_string()
            } else if upper == "QUIT" {
                stream.get_mut().write_all(b"221 2.0.0 bye\r\n").await.unwrap();
                break;
            } else {
                "500 5.5.2 unknown command\r\n".to_string()
            };
            stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
        }
        transcript
    }

    fn client() -> SmtpClient {
        SmtpClient::new(ClientOptions {
            command_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            ..ClientOptions::default()
        })
    }

    fn email() -> WireEmail {
        WireEmail {
            from: "Sender <sender@example.com>".into(),
            to: vec!["a@example.com".into()],
            cc: vec!["b@example.com".into()],
            bcc: vec!["hidden@example.com".into()],
            subject: "Hello".into(),
            text: Some(b"hi there".to_vec()),
            ..WireEmail::default()
        }
    }

    fn plain_auth() -> Auth {
        Auth::plain("", "user", "pass", "127.0.0.1")
    }

    #[tokio::test]
    async fn test_plain_delivery_with_auth() {
        let (addr, server) = start(Script {
            ehlo: Some(vec!["AUTH PLAIN", "8BITMIME"]),
            ..Script::default()
        })
        .await;

        client().send_plain(&addr, &plain_auth(), &email()).await.unwrap();

        let transcript = server.await.unwrap();
        assert_eq!(
            transcript.commands,
            [
                "EHLO localhost".to_string(),
                format!("AUTH PLAIN {}", BASE64.encode("\0user\0pass")),
                "MAIL FROM:<sender@example.com> BODY=8BITMIME".to_string(),
                "RCPT TO:<a@example.com>".to_string(),
                "RCPT TO:<b@example.com>".to_string(),
                "RCPT TO:<hidden@example.com>".to_string(),
                "DATA".to_string(),
                "QUIT".to_string(),
            ]
        );
        assert!(transcript.data.contains("Subject: Hello\r\n"));
        assert!(transcript.data.contains("To: a@example.com\r\n"));
        assert!(!transcript.data.contains("hidden@example.com"));
        assert!(transcript.data.contains("hi there"));
    }

    #[tokio::test]
    async fn test_envelope_sender_override() {
        let (addr, server) = start(Script {
            ehlo: Some(vec!["AUTH PLAIN"]),
            ..Script::default()
        })
        .await;

        let email = WireEmail {
            sender: Some("bounce@example.com".into()),
            ..email()
        };
        client().send_plain(&addr, &plain_auth(), &email).await.unwrap();

        let transcript = server.await.unwrap();
        assert!(transcript
            .commands
            .contains(&"MAIL FROM:<bounce@example.com>".to_string()));
        assert!(transcript.data.contains("From: Sender <sender@example.com>\r\n"));
    }

    #[tokio::test]
    async fn test_helo_fallback_skips_auth() {
        let (addr, server) = start(Script::default()).await;

        client().send_plain(&addr, &plain_auth(), &email()).await.unwrap();

        let transcript = server.await.unwrap();
        assert_eq!(transcript.commands[0], "EHLO localhost");
        assert_eq!(transcript.commands[1], "HELO localhost");
        assert_eq!(transcript.commands[2], "MAIL FROM:<sender@example.com>");
        assert!(!transcript.commands.iter().any(|c| c.starts_with("AUTH")));
    }

    #[tokio::test]
    async fn test_esmtp_without_extensions_still_requires_auth() {
        let (addr, server) = start(Script {
            ehlo: Some(vec![]),
            ..Script::default()
        })
        .await;

        let err = client().send_plain(&addr, &plain_auth(), &email()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);

        let transcript = server.await.unwrap();
        assert_eq!(transcript.commands, ["EHLO localhost"]);
    }

    #[tokio::test]
    async fn test_unadvertised_mechanism_is_refused() {
        let (addr, server) = start(Script {
            ehlo: Some(vec!["AUTH CRAM-MD5"]),
            ..Script::default()
        })
        .await;

        let err = client().send_plain(&addr, &plain_auth(), &email()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);

        let transcript = server.await.unwrap();
        assert!(!transcript.commands.iter().any(|c| c.starts_with("AUTH")));
    }

    #[tokio::test]
    async fn test_message_above_size_limit_is_refused() {
        let (addr, server) = start(Script {
            ehlo: Some(vec!["SIZE 64", "AUTH PLAIN"]),
            ..Script::default()
        })
        .await;

        let err = client().send_plain(&addr, &plain_auth(), &email()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MessageTooLarge);

        let transcript = server.await.unwrap();
        assert!(!transcript.commands.iter().any(|c| c.starts_with("MAIL")));
    }

    #[tokio::test]
    async fn test_cram_md5_exchange() {
        let (addr, server) = start(Script {
            ehlo: Some(vec!["AUTH CRAM-MD5"]),
            challenge: Some("PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+"),
        })
        .await;

        let auth = Auth::cram_md5("tim", "tanstaaftanstaaf");
        client().send_plain(&addr, &auth, &email()).await.unwrap();

        let transcript = server.await.unwrap();
        assert_eq!(transcript.commands[1], "AUTH CRAM-MD5");
        let answer = BASE64.decode(&transcript.commands[2]).unwrap();
        assert_eq!(answer, b"tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[tokio::test]
    async fn test_rejected_recipient_fails_delivery() {
        let (addr, server) = start(Script {
            ehlo: Some(vec!["AUTH PLAIN"]),
            ..Script::default()
        })
        .await;

        let email = WireEmail {
            cc: vec!["reject@example.com".into()],
            ..email()
        };
        let err = client().send_plain(&addr, &plain_auth(), &email).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidRecipientAddress);
        assert_eq!(err.smtp_code(), Some(550));

        let transcript = server.await.unwrap();
        assert!(!transcript.commands.contains(&"DATA".to_string()));
    }

    #[tokio::test]
    async fn test_esmtp_without_auth_is_refused() {
        let (addr, _server) = start(Script {
            ehlo: Some(vec!["8BITMIME"]),
            ..Script::default()
        })
        .await;

        let err = client().send_plain(&addr, &plain_auth(), &email()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);
    }

    #[tokio::test]
    async fn test_plain_auth_host_mismatch() {
        let (addr, _server) = start(Script {
            ehlo: Some(vec!["AUTH PLAIN"]),
            ..Script::default()
        })
        .await;

        let auth = Auth::plain("", "user", "pass", "localhost");
        let err = client().send_plain(&addr, &auth, &email()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthHostMismatch);
    }

    #[tokio::test]
    async fn test_starttls_required() {
        let (addr, _server) = start(Script {
            ehlo: Some(vec!["AUTH PLAIN"]),
            ..Script::default()
        })
        .await;

        let tls = TlsSettings::webpki_roots("127.0.0.1").unwrap();
        let err = client()
            .send_with_starttls(&addr, &plain_auth(), &email(), &tls)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::StarttlsNotSupported);
    }

    #[tokio::test]
    async fn test_envelope_validation_happens_before_connecting() {
        let addr = "127.0.0.1:1";

        let no_recipients = WireEmail {
            to: vec![],
            cc: vec![],
            bcc: vec![],
            ..email()
        };
        let err = client().send_plain(addr, &plain_auth(), &no_recipients).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidRecipientAddress);

        let injected = WireEmail {
            to: vec!["a@example.com\r\nRCPT TO:<x@example.com>".into()],
            ..email()
        };
        let err = client().send_plain(addr, &plain_auth(), &injected).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidHeader);

        let bad_sender = WireEmail {
            from: "not an address".into(),
            ..email()
        };
        let err = client().send_plain(addr, &plain_auth(), &bad_sender).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidFromAddress);
    }

    #[test]
    fn test_expect_maps_replies() {
        assert!(expect(SmtpResponse::new(250, "ok"), codes::OK).is_ok());

        let err = expect(SmtpResponse::new(354, "go ahead"), codes::OK).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::UnexpectedResponse);
        assert_eq!(err.smtp_code(), Some(354));

        let err = expect(SmtpResponse::new(535, "bad credentials"), codes::AUTH_SUCCESS).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::CredentialsInvalid);
    }
}

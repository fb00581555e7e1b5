//! TCP connection with optional TLS, speaking SMTP lines.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::TlsSettings;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{SmtpCommand, SmtpResponse};

/// Plain TCP or TLS over TCP.
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// One SMTP connection.
pub struct Connection {
    reader: BufReader<Stream>,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tls", &self.is_tls())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl Connection {
    /// Opens a TCP connection to `addr`.
    ///
    /// The server greeting is not read.
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> SmtpResult<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                SmtpError::new(
                    SmtpErrorKind::ConnectTimeout,
                    format!("connecting to {} timed out", addr),
                )
            })?
            .map_err(|e| map_connect_error(e, addr))?;

        stream.set_nodelay(true).ok();

        #[cfg(feature = "tracing")]
        tracing::debug!(addr, "connected to SMTP server");

        Ok(Self {
            reader: BufReader::new(Stream::Plain(stream)),
            connect_timeout,
            command_timeout,
        })
    }

    /// Performs the TLS handshake over the current TCP stream.
    pub async fn upgrade(self, tls: &TlsSettings) -> SmtpResult<Self> {
        if !self.reader.buffer().is_empty() {
            return Err(SmtpError::protocol("server sent data before TLS handshake"));
        }
        let tcp = match self.reader.into_inner() {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(_) => return Err(SmtpError::tls("connection is already encrypted")),
        };

        let server_name = tls.rustls_server_name()?;
        let connector = TlsConnector::from(tls.client_config());
        let stream = timeout(self.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| SmtpError::new(SmtpErrorKind::ConnectTimeout, "TLS handshake timed out"))?
            .map_err(|e| SmtpError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(server_name = tls.server_name(), "TLS established");

        Ok(Self {
            reader: BufReader::new(Stream::Tls(Box::new(stream))),
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.reader.get_ref(), Stream::Tls(_))
    }

    /// Sends one command and reads its reply.
    pub async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "sending SMTP command");

        let line = format!("{}\r\n", command.to_smtp_string());
        self.write_all(line.as_bytes()).await?;
        self.read_response().await
    }

    /// Writes raw bytes, used for the message payload.
    pub async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.write_all(data).await
    }

    /// Reads one complete, possibly multiline, reply.
    pub async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = timeout(self.command_timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::new(SmtpErrorKind::ReadTimeout, "read timed out"))?
                .map_err(|e| SmtpError::protocol(format!("read error: {}", e)).with_cause(e))?;
            if n == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "server closed the connection",
                ));
            }

            let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);
            if !more {
                break;
            }
        }

        let response = SmtpResponse::parse(&lines)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.first_line(), "received SMTP reply");

        Ok(response)
    }

    /// Closes the write side of the connection.
    pub async fn shutdown(&mut self) {
        let _ = timeout(self.command_timeout, self.reader.get_mut().shutdown()).await;
    }

    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        let stream = self.reader.get_mut();
        timeout(self.command_timeout, async move {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| SmtpError::new(SmtpErrorKind::WriteTimeout, "write timed out"))?
        .map_err(|e| SmtpError::protocol(format!("write error: {}", e)).with_cause(e))
    }
}

fn map_connect_error(error: io::Error, addr: &str) -> SmtpError {
    let kind = match error.kind() {
        io::ErrorKind::TimedOut => SmtpErrorKind::ConnectTimeout,
        io::ErrorKind::ConnectionReset => SmtpErrorKind::ConnectionReset,
        _ => SmtpErrorKind::ConnectionRefused,
    };
    SmtpError::new(kind, format!("cannot connect to {}: {}", addr, error)).with_cause(error)
}

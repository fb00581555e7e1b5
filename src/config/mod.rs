//! Configuration for SMTP delivery.
//!
//! [`SmtpConfig`] is the declarative surface: an address, credentials and
//! three switches. [`SmtpConfig::new_sender`] turns it into a ready
//! [`SmtpSender`]. [`TlsSettings`] and [`ClientOptions`] are the lower-level
//! knobs the sender and client take directly.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::auth::Auth;
use crate::client::SmtpClient;
use crate::errors::{EmailResult, SmtpError, SmtpErrorKind, SmtpResult};
use crate::smtp::SmtpSender;

/// Default timeout for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for each command round trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Name announced in `EHLO`/`HELO` unless configured otherwise.
pub const DEFAULT_HELLO_NAME: &str = "localhost";

/// SMTP delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Server address as `host:port`.
    pub server_addr: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "empty_secret")]
    pub password: SecretString,
    /// Authenticate with CRAM-MD5 instead of PLAIN.
    #[serde(default)]
    pub use_cram_md5: bool,
    /// Disable TLS entirely.
    #[serde(default)]
    pub use_clear: bool,
    /// Upgrade with STARTTLS instead of connecting over TLS. Ignored when
    /// `use_clear` is set.
    #[serde(default = "default_true")]
    pub use_start_tls: bool,
    /// Client connection options.
    #[serde(default)]
    pub client: ClientOptions,
}

fn default_true() -> bool {
    true
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Reads the configuration from the environment.
    ///
    /// `SMTP_ADDR` is required. `SMTP_USERNAME` and `SMTP_PASSWORD` default
    /// to empty, and the boolean switches `SMTP_USE_STARTTLS`,
    /// `SMTP_USE_CRAM_MD5` and `SMTP_USE_CLEAR` to their field defaults.
    pub fn from_env() -> SmtpResult<Self> {
        let server_addr = std::env::var("SMTP_ADDR")
            .map_err(|_| SmtpError::configuration("SMTP_ADDR is not set"))?;

        let mut builder = Self::builder()
            .server_addr(server_addr)
            .username(std::env::var("SMTP_USERNAME").unwrap_or_default())
            .password(std::env::var("SMTP_PASSWORD").unwrap_or_default());

        if let Some(v) = env_flag("SMTP_USE_STARTTLS")? {
            builder = builder.use_start_tls(v);
        }
        if let Some(v) = env_flag("SMTP_USE_CRAM_MD5")? {
            builder = builder.use_cram_md5(v);
        }
        if let Some(v) = env_flag("SMTP_USE_CLEAR")? {
            builder = builder.use_clear(v);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        if self.server_addr.trim().is_empty() {
            return Err(SmtpError::configuration("server_addr is required"));
        }
        Ok(())
    }

    /// Host part of `server_addr`, or the whole address when it has no port.
    pub fn host(&self) -> &str {
        split_host_port(&self.server_addr)
            .map(|(host, _)| host)
            .unwrap_or(&self.server_addr)
    }

    /// Credentials derived from the configuration.
    pub fn auth(&self) -> Auth {
        if self.use_cram_md5 {
            Auth::cram_md5(&self.username, self.password.expose_secret().as_str())
        } else {
            Auth::plain(
                "",
                &self.username,
                self.password.expose_secret().as_str(),
                self.host(),
            )
        }
    }

    /// Builds a sender from this configuration.
    ///
    /// Unless `use_clear` is set, server certificates are verified against
    /// the system trust store.
    pub fn new_sender(&self) -> EmailResult<SmtpSender> {
        self.validate()?;
        let host = self.host();

        let mut sender = SmtpSender::with_delivery(
            self.server_addr.clone(),
            self.auth(),
            SmtpClient::new(self.client.clone()),
        );

        if !self.use_clear {
            sender = sender
                .with_tls(TlsSettings::native_roots(host)?)
                .with_start_tls(self.use_start_tls);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            server = %self.server_addr,
            auth = self.auth().mechanism(),
            clear = self.use_clear,
            start_tls = self.use_start_tls,
            "configured SMTP sender"
        );

        Ok(sender)
    }
}

/// Builder for [`SmtpConfig`].
#[derive(Debug)]
pub struct SmtpConfigBuilder {
    config: SmtpConfig,
}

impl Default for SmtpConfigBuilder {
    fn default() -> Self {
        Self {
            config: SmtpConfig {
                server_addr: String::new(),
                username: String::new(),
                password: empty_secret(),
                use_cram_md5: false,
                use_clear: false,
                use_start_tls: true,
                client: ClientOptions::default(),
            },
        }
    }
}

impl SmtpConfigBuilder {
    pub fn server_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server_addr = addr.into();
        self
    }

    /// Sets username and password together.
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username(username).password(password)
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = SecretString::new(password.into());
        self
    }

    pub fn use_cram_md5(mut self, enabled: bool) -> Self {
        self.config.use_cram_md5 = enabled;
        self
    }

    pub fn use_clear(mut self, enabled: bool) -> Self {
        self.config.use_clear = enabled;
        self
    }

    pub fn use_start_tls(mut self, enabled: bool) -> Self {
        self.config.use_start_tls = enabled;
        self
    }

    pub fn client(mut self, options: ClientOptions) -> Self {
        self.config.client = options;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<SmtpConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Connection options for [`SmtpClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Name announced in `EHLO`/`HELO`.
    #[serde(default = "default_hello_name")]
    pub hello_name: String,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_hello_name() -> String { DEFAULT_HELLO_NAME.to_string() }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_command_timeout() -> Duration { DEFAULT_COMMAND_TIMEOUT }

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            hello_name: default_hello_name(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// TLS client settings: the name to verify and the rustls configuration.
#[derive(Clone)]
pub struct TlsSettings {
    server_name: String,
    config: Arc<ClientConfig>,
}

impl TlsSettings {
    /// Verifies `server_name` against the operating system trust store.
    pub fn native_roots(server_name: impl Into<String>) -> EmailResult<Self> {
        let mut store = RootCertStore::empty();
        let (added, _ignored) =
            store.add_parsable_certificates(rustls_native_certs::load_native_certs()?);
        if added == 0 {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no usable certificates in the system trust store",
            )
            .into());
        }
        Self::with_roots(server_name, store)
    }

    /// Verifies `server_name` against the bundled Mozilla roots.
    pub fn webpki_roots(server_name: impl Into<String>) -> EmailResult<Self> {
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(server_name, store)
    }

    /// Verifies `server_name` against the PEM certificates in `path`.
    pub fn with_ca_file(server_name: impl Into<String>, path: impl AsRef<Path>) -> EmailResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut store = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut reader) {
            store.add(cert?).map_err(|e| {
                SmtpError::tls(format!("invalid CA certificate: {}", e)).with_cause(e)
            })?;
        }
        Self::with_roots(server_name, store)
    }

    /// Uses a caller-built rustls configuration.
    pub fn from_client_config(server_name: impl Into<String>, config: Arc<ClientConfig>) -> EmailResult<Self> {
        let server_name = server_name.into();
        validate_server_name(&server_name)?;
        Ok(Self { server_name, config })
    }

    fn with_roots(server_name: impl Into<String>, store: RootCertStore) -> EmailResult<Self> {
        let config = ClientConfig::builder()
            .with_root_certificates(store)
            .with_no_client_auth();
        Self::from_client_config(server_name, Arc::new(config))
    }

    /// Name the server certificate must match.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    pub(crate) fn rustls_server_name(&self) -> SmtpResult<ServerName<'static>> {
        validate_server_name(&self.server_name)
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

fn validate_server_name(name: &str) -> SmtpResult<ServerName<'static>> {
    ServerName::try_from(name.to_string()).map_err(|e| {
        SmtpError::new(
            SmtpErrorKind::InvalidServerName,
            format!("invalid TLS server name {:?}", name),
        )
        .with_cause(e)
    })
}

/// Splits `host:port`, accepting bracketed IPv6 hosts.
pub(crate) fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return (!port.contains(':')).then_some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    (!host.contains(':') && !host.contains('[') && !host.contains(']')).then_some((host, port))
}

fn env_flag(name: &str) -> SmtpResult<Option<bool>> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(SmtpError::configuration(format!(
                "{} must be a boolean, got {:?}",
                name, value
            ))),
        },
        Err(_) => Ok(None),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("smtp.example.com:587", Some(("smtp.example.com", "587")))]
    #[case("[::1]:25", Some(("::1", "25")))]
    #[case("smtp.example.com", None)]
    #[case("::1", None)]
    #[case("[::1]", None)]
    fn test_split_host_port(#[case] addr: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(split_host_port(addr), expected);
    }

    #[test]
    fn test_host_falls_back_to_address() {
        let config = SmtpConfig::builder().server_addr("mail.internal").build().unwrap();
        assert_eq!(config.host(), "mail.internal");

        let config = SmtpConfig::builder().server_addr("mail.internal:2525").build().unwrap();
        assert_eq!(config.host(), "mail.internal");
    }

    #[test]
    fn test_builder_defaults() {
        let config = SmtpConfig::builder()
            .server_addr("smtp.example.com:587")
            .credentials("user", "pass")
            .build()
            .unwrap();

        assert!(config.use_start_tls);
        assert!(!config.use_clear);
        assert!(!config.use_cram_md5);
        assert_eq!(config.password.expose_secret(), "pass");
        assert_eq!(config.client, ClientOptions::default());
    }

    #[test]
    fn test_builder_requires_address() {
        let err = SmtpConfig::builder().build().unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConfigurationInvalid);
    }

    #[test]
    fn test_auth_selection() {
        let config = SmtpConfig::builder()
            .server_addr("smtp.example.com:587")
            .credentials("user", "pass")
            .build()
            .unwrap();
        match config.auth() {
            Auth::Plain { identity, username, host, .. } => {
                assert_eq!(identity, "");
                assert_eq!(username, "user");
                assert_eq!(host, "smtp.example.com");
            }
            other => panic!("unexpected auth: {:?}", other),
        }

        let config = SmtpConfig::builder()
            .server_addr("smtp.example.com:587")
            .use_cram_md5(true)
            .build()
            .unwrap();
        assert_eq!(config.auth().mechanism(), "CRAM-MD5");
    }

    #[test]
    fn test_deserialize() {
        let config: SmtpConfig = serde_json::from_value(serde_json::json!({
            "server_addr": "smtp.example.com:465",
            "username": "user",
            "password": "secret",
            "use_start_tls": false,
            "client": { "hello_name": "mailer.example.com", "command_timeout": "5s" }
        }))
        .unwrap();

        assert_eq!(config.server_addr, "smtp.example.com:465");
        assert_eq!(config.password.expose_secret(), "secret");
        assert!(!config.use_start_tls);
        assert!(!config.use_clear);
        assert_eq!(config.client.hello_name, "mailer.example.com");
        assert_eq!(config.client.command_timeout, Duration::from_secs(5));
        assert_eq!(config.client.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_debug_hides_password() {
        let config = SmtpConfig::builder()
            .server_addr("smtp.example.com:587")
            .credentials("user", "hunter2")
            .build()
            .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_clear_sender_has_no_tls() {
        let sender = SmtpConfig::builder()
            .server_addr("localhost:2525")
            .use_clear(true)
            .build()
            .unwrap()
            .new_sender()
            .unwrap();
        assert!(sender.tls().is_none());
        assert!(!sender.start_tls());
    }

    #[test]
    fn test_webpki_settings() {
        let tls = TlsSettings::webpki_roots("smtp.example.com").unwrap();
        assert_eq!(tls.server_name(), "smtp.example.com");
        assert!(TlsSettings::webpki_roots("not a host name").is_err());
    }

    #[test]
    fn test_ca_file_missing() {
        let err = TlsSettings::with_ca_file("smtp.example.com", "/nonexistent/ca.pem").unwrap_err();
        assert!(matches!(err, crate::EmailError::Io(_)));
    }
}

//! Message model.
//!
//! A [`Message`] owns every byte it refers to. Bodies and attachments read
//! from streams go through the global [`BufferPool`] and are copied out
//! before the ingesting call returns.

use std::fmt;
use std::io::Read;

use serde::Serialize;

use crate::errors::{EmailResult, SmtpError, SmtpErrorKind, SmtpResult};
use crate::fs::{base_name, FileSystem};
use crate::options::{HtmlOpt, MessageBuilder, MessageOpt};
use crate::pool::BufferPool;
use crate::template::Template;

/// Guesses a content type from the extension of `name`.
///
/// Unknown or missing extensions map to `application/octet-stream`.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or(mime::APPLICATION_OCTET_STREAM)
        .to_string()
}

/// Named blob with a content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    name: String,
    content_type: String,
    body: Vec<u8>,
}

impl Attachment {
    /// Reads `reader` to the end and builds an attachment from its contents.
    pub fn new<R: Read>(
        name: impl Into<String>,
        content_type: impl Into<String>,
        reader: R,
    ) -> EmailResult<Self> {
        let body = BufferPool::global().read_to_vec(reader)?;
        Ok(Self {
            name: name.into(),
            content_type: content_type.into(),
            body,
        })
    }

    /// Builds an attachment from a copy of `body`.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        body: &[u8],
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            body: body.to_vec(),
        }
    }

    /// Loads `name` from `fs`.
    ///
    /// The attachment is named after the final path element and its content
    /// type is guessed from the extension.
    pub fn from_file<F: FileSystem + ?Sized>(fs: &F, name: &str) -> EmailResult<Self> {
        let body = {
            let file = fs.open(name)?;
            BufferPool::global().read_to_vec(file)?
        };
        let display = base_name(name);
        Ok(Self {
            name: display.to_string(),
            content_type: content_type_for(display),
            body,
        })
    }

    /// Display name; for inline attachments this is the content ID.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// HTML body with the resources it references through `cid:` URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlBody {
    body: Vec<u8>,
    inlines: Vec<Attachment>,
}

impl HtmlBody {
    /// Creates an HTML body from a copy of `body` with no inline resources.
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            inlines: Vec::new(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Inline resources in the order they were added.
    pub fn inlines(&self) -> &[Attachment] {
        &self.inlines
    }

    /// Adds an inline resource read from `reader`.
    ///
    /// `name` is the identifier the HTML refers to as `cid:<name>`.
    pub fn inline<R: Read>(
        &mut self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        reader: R,
    ) -> EmailResult<()> {
        self.inlines.push(Attachment::new(name, content_type, reader)?);
        Ok(())
    }

    /// Adds an inline resource from a copy of `body`.
    pub fn inline_from_bytes(
        &mut self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        body: &[u8],
    ) {
        self.inlines
            .push(Attachment::from_bytes(name, content_type, body));
    }

    /// Adds an inline resource loaded from `fs`.
    pub fn inline_from_file<F: FileSystem + ?Sized>(&mut self, fs: &F, name: &str) -> EmailResult<()> {
        self.inlines.push(Attachment::from_file(fs, name)?);
        Ok(())
    }

    fn apply<'a>(&mut self, opts: impl IntoIterator<Item = HtmlOpt<'a>>) -> EmailResult<()> {
        for opt in opts {
            opt.apply(self)?;
        }
        Ok(())
    }
}

/// Email message: envelope, bodies and attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: String,
    plain: Option<Vec<u8>>,
    html: Option<HtmlBody>,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Creates a message and applies `opts` in order.
    ///
    /// The first failing option aborts construction and its error is
    /// returned as is.
    pub fn new<'a>(
        from: impl Into<String>,
        subject: impl Into<String>,
        opts: impl IntoIterator<Item = MessageOpt<'a>>,
    ) -> EmailResult<Self> {
        let mut message = Self {
            from: from.into(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            plain: None,
            html: None,
            attachments: Vec::new(),
        };
        for opt in opts {
            opt.apply(&mut message)?;
        }
        Ok(message)
    }

    /// Starts a fluent builder.
    pub fn builder<'a>(from: impl Into<String>, subject: impl Into<String>) -> MessageBuilder<'a> {
        MessageBuilder::new(from, subject)
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &[String] {
        &self.to
    }

    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain-text body, if set.
    pub fn plain(&self) -> Option<&[u8]> {
        self.plain.as_deref()
    }

    /// HTML body, if set.
    pub fn html(&self) -> Option<&HtmlBody> {
        self.html.as_ref()
    }

    /// Regular (non-inline) attachments in the order they were added.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Appends primary recipients.
    pub fn add_to<I, S>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addrs.into_iter().map(Into::into));
    }

    /// Appends carbon-copy recipients.
    pub fn add_cc<I, S>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc.extend(addrs.into_iter().map(Into::into));
    }

    /// Appends blind carbon-copy recipients.
    pub fn add_bcc<I, S>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bcc.extend(addrs.into_iter().map(Into::into));
    }

    /// Replaces the plain body with the full contents of `reader`.
    pub fn set_plain<R: Read>(&mut self, reader: R) -> EmailResult<()> {
        self.plain = Some(BufferPool::global().read_to_vec(reader)?);
        Ok(())
    }

    /// Replaces the plain body with a copy of `body`.
    pub fn set_plain_from_bytes(&mut self, body: &[u8]) {
        self.plain = Some(body.to_vec());
    }

    /// Renders `template` with `data` into the plain body.
    ///
    /// An empty `name` executes the default template.
    pub fn set_plain_from_template<T, D>(&mut self, template: &T, name: &str, data: &D) -> EmailResult<()>
    where
        T: Template + ?Sized,
        D: Serialize + ?Sized,
    {
        let mut buf = BufferPool::global().acquire();
        render(template, name, data, &mut buf)?;
        self.set_plain_from_bytes(&buf);
        Ok(())
    }

    /// Replaces the HTML body with the contents of `reader`, then applies
    /// `opts` to it.
    ///
    /// The current HTML body is left untouched if anything fails.
    pub fn set_html<'a, R: Read>(
        &mut self,
        reader: R,
        opts: impl IntoIterator<Item = HtmlOpt<'a>>,
    ) -> EmailResult<()> {
        let body = BufferPool::global().read_to_vec(reader)?;
        let mut html = HtmlBody {
            body,
            inlines: Vec::new(),
        };
        html.apply(opts)?;
        self.html = Some(html);
        Ok(())
    }

    /// Replaces the HTML body with a copy of `body`, then applies `opts`.
    pub fn set_html_from_bytes<'a>(
        &mut self,
        body: &[u8],
        opts: impl IntoIterator<Item = HtmlOpt<'a>>,
    ) -> EmailResult<()> {
        let mut html = HtmlBody::new(body);
        html.apply(opts)?;
        self.html = Some(html);
        Ok(())
    }

    /// Renders `template` with `data` into the HTML body, then applies `opts`.
    pub fn set_html_from_template<'a, T, D>(
        &mut self,
        template: &T,
        name: &str,
        data: &D,
        opts: impl IntoIterator<Item = HtmlOpt<'a>>,
    ) -> EmailResult<()>
    where
        T: Template + ?Sized,
        D: Serialize + ?Sized,
    {
        let mut buf = BufferPool::global().acquire();
        render(template, name, data, &mut buf)?;
        self.set_html_from_bytes(&buf, opts)
    }

    /// Appends an attachment read from `reader`.
    pub fn attach<R: Read>(
        &mut self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        reader: R,
    ) -> EmailResult<()> {
        self.attachments
            .push(Attachment::new(name, content_type, reader)?);
        Ok(())
    }

    /// Appends an attachment from a copy of `body`.
    pub fn attach_from_bytes(
        &mut self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        body: &[u8],
    ) {
        self.attachments
            .push(Attachment::from_bytes(name, content_type, body));
    }

    /// Appends an attachment loaded from `fs`.
    pub fn attach_from_file<F: FileSystem + ?Sized>(&mut self, fs: &F, name: &str) -> EmailResult<()> {
        self.attachments.push(Attachment::from_file(fs, name)?);
        Ok(())
    }
}

fn render<T, D>(template: &T, name: &str, data: &D, out: &mut Vec<u8>) -> EmailResult<()>
where
    T: Template + ?Sized,
    D: Serialize + ?Sized,
{
    if name.is_empty() {
        template.execute(out, data)
    } else {
        template.execute_named(name, out, data)
    }
}

/// Mailbox address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    name: Option<String>,
    email: String,
}

impl Address {
    /// Parses `Name <user@host>` or a bare `user@host`.
    pub fn parse(s: &str) -> SmtpResult<Self> {
        Self::parse_as(s, SmtpErrorKind::InvalidRecipientAddress)
    }

    /// Like [`parse`](Self::parse), reporting failures with `kind`.
    pub(crate) fn parse_as(s: &str, kind: SmtpErrorKind) -> SmtpResult<Self> {
        let s = s.trim();
        let (name, email) = match (s.rfind('<'), s.ends_with('>')) {
            (Some(start), true) => {
                let name = s[..start].trim().trim_matches('"').trim();
                let name = (!name.is_empty()).then(|| name.to_string());
                (name, s[start + 1..s.len() - 1].trim())
            }
            _ => (None, s),
        };
        validate_email(email).map_err(|reason| {
            SmtpError::new(kind, format!("{}: {:?}", reason, s))
        })?;
        Ok(Self {
            name,
            email: email.to_string(),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Path form used in `MAIL FROM` and `RCPT TO`.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') => {
                write!(f, "\"{}\" <{}>", name.replace('"', "\\\""), self.email)
            }
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => f.write_str(&self.email),
        }
    }
}

fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.is_empty() {
        return Err("empty address");
    }
    if email.len() > 254 {
        return Err("address too long");
    }
    if email.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("address contains whitespace or control characters");
    }
    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => return Err("missing @ in address"),
    };
    if domain.contains('@') {
        return Err("more than one @ in address");
    }
    if local.is_empty() || local.len() > 64 {
        return Err("local part must be 1-64 characters");
    }
    if domain.is_empty() {
        return Err("missing domain in address");
    }
    Ok(())
}

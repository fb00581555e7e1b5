//! Composable construction options for [`Message`] and [`HtmlBody`].
//!
//! Options are deferred operations. [`Message::new`] applies them in order
//! and stops at the first error, so a message either has every requested
//! body and attachment or is not created at all.

use std::io::Read;

use serde::Serialize;

use crate::errors::EmailResult;
use crate::fs::FileSystem;
use crate::template::Template;
use crate::types::{HtmlBody, Message};

/// Deferred operation on a [`Message`] under construction.
pub struct MessageOpt<'a>(Box<dyn FnOnce(&mut Message) -> EmailResult<()> + 'a>);

impl<'a> MessageOpt<'a> {
    /// Wraps a custom operation.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut Message) -> EmailResult<()> + 'a,
    {
        Self(Box::new(f))
    }

    pub(crate) fn apply(self, message: &mut Message) -> EmailResult<()> {
        (self.0)(message)
    }
}

/// Deferred operation on an [`HtmlBody`] under construction.
pub struct HtmlOpt<'a>(Box<dyn FnOnce(&mut HtmlBody) -> EmailResult<()> + 'a>);

impl<'a> HtmlOpt<'a> {
    /// Wraps a custom operation.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut HtmlBody) -> EmailResult<()> + 'a,
    {
        Self(Box::new(f))
    }

    pub(crate) fn apply(self, html: &mut HtmlBody) -> EmailResult<()> {
        (self.0)(html)
    }
}

/// Appends primary recipients.
pub fn to<'a, I, S>(addrs: I) -> MessageOpt<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let addrs: Vec<String> = addrs.into_iter().map(Into::into).collect();
    MessageOpt::new(move |m| {
        m.add_to(addrs);
        Ok(())
    })
}

/// Appends carbon-copy recipients.
pub fn cc<'a, I, S>(addrs: I) -> MessageOpt<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let addrs: Vec<String> = addrs.into_iter().map(Into::into).collect();
    MessageOpt::new(move |m| {
        m.add_cc(addrs);
        Ok(())
    })
}

/// Appends blind carbon-copy recipients.
pub fn bcc<'a, I, S>(addrs: I) -> MessageOpt<'a>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let addrs: Vec<String> = addrs.into_iter().map(Into::into).collect();
    MessageOpt::new(move |m| {
        m.add_bcc(addrs);
        Ok(())
    })
}

/// Sets the plain body from a reader.
pub fn set_plain<'a, R: Read + 'a>(reader: R) -> MessageOpt<'a> {
    MessageOpt::new(move |m| m.set_plain(reader))
}

/// Sets the plain body from a string.
pub fn set_plain_from_string<'a>(body: impl Into<String>) -> MessageOpt<'a> {
    let body = body.into();
    MessageOpt::new(move |m| {
        m.set_plain_from_bytes(body.as_bytes());
        Ok(())
    })
}

/// Sets the plain body from a copy of `body`.
pub fn set_plain_from_bytes(body: &[u8]) -> MessageOpt<'_> {
    MessageOpt::new(move |m| {
        m.set_plain_from_bytes(body);
        Ok(())
    })
}

/// Sets the plain body by rendering a template.
///
/// An empty `name` executes the default template.
pub fn set_plain_from_template<'a, T, D>(template: &'a T, name: &'a str, data: &'a D) -> MessageOpt<'a>
where
    T: Template + ?Sized,
    D: Serialize + ?Sized,
{
    MessageOpt::new(move |m| m.set_plain_from_template(template, name, data))
}

/// Sets the HTML body from a reader and applies `opts` to it.
pub fn set_html<'a, R: Read + 'a>(
    reader: R,
    opts: impl IntoIterator<Item = HtmlOpt<'a>>,
) -> MessageOpt<'a> {
    let opts: Vec<HtmlOpt<'a>> = opts.into_iter().collect();
    MessageOpt::new(move |m| m.set_html(reader, opts))
}

/// Sets the HTML body from a string and applies `opts` to it.
pub fn set_html_from_string<'a>(
    body: impl Into<String>,
    opts: impl IntoIterator<Item = HtmlOpt<'a>>,
) -> MessageOpt<'a> {
    let body = body.into();
    let opts: Vec<HtmlOpt<'a>> = opts.into_iter().collect();
    MessageOpt::new(move |m| m.set_html_from_bytes(body.as_bytes(), opts))
}

/// Sets the HTML body from a copy of `body` and applies `opts` to it.
pub fn set_html_from_bytes<'a>(
    body: &'a [u8],
    opts: impl IntoIterator<Item = HtmlOpt<'a>>,
) -> MessageOpt<'a> {
    let opts: Vec<HtmlOpt<'a>> = opts.into_iter().collect();
    MessageOpt::new(move |m| m.set_html_from_bytes(body, opts))
}

/// Sets the HTML body by rendering a template and applies `opts` to it.
pub fn set_html_from_template<'a, T, D>(
    template: &'a T,
    name: &'a str,
    data: &'a D,
    opts: impl IntoIterator<Item = HtmlOpt<'a>>,
) -> MessageOpt<'a>
where
    T: Template + ?Sized,
    D: Serialize + ?Sized,
{
    let opts: Vec<HtmlOpt<'a>> = opts.into_iter().collect();
    MessageOpt::new(move |m| m.set_html_from_template(template, name, data, opts))
}

/// Attaches the contents of a reader.
pub fn attach<'a, R: Read + 'a>(
    name: impl Into<String>,
    content_type: impl Into<String>,
    reader: R,
) -> MessageOpt<'a> {
    let (name, content_type) = (name.into(), content_type.into());
    MessageOpt::new(move |m| m.attach(name, content_type, reader))
}

/// Attaches a copy of `body`.
pub fn attach_from_bytes<'a>(
    name: impl Into<String>,
    content_type: impl Into<String>,
    body: &'a [u8],
) -> MessageOpt<'a> {
    let (name, content_type) = (name.into(), content_type.into());
    MessageOpt::new(move |m| {
        m.attach_from_bytes(name, content_type, body);
        Ok(())
    })
}

/// Attaches a file from `fs`, named after its final path element.
pub fn attach_from_file<'a, F: FileSystem + ?Sized>(fs: &'a F, name: impl Into<String>) -> MessageOpt<'a> {
    let name = name.into();
    MessageOpt::new(move |m| m.attach_from_file(fs, &name))
}

/// Adds an inline resource read from a reader.
pub fn inline<'a, R: Read + 'a>(
    name: impl Into<String>,
    content_type: impl Into<String>,
    reader: R,
) -> HtmlOpt<'a> {
    let (name, content_type) = (name.into(), content_type.into());
    HtmlOpt::new(move |h| h.inline(name, content_type, reader))
}

/// Adds an inline resource from a copy of `body`.
pub fn inline_from_bytes<'a>(
    name: impl Into<String>,
    content_type: impl Into<String>,
    body: &'a [u8],
) -> HtmlOpt<'a> {
    let (name, content_type) = (name.into(), content_type.into());
    HtmlOpt::new(move |h| {
        h.inline_from_bytes(name, content_type, body);
        Ok(())
    })
}

/// Adds an inline resource loaded from `fs`.
pub fn inline_from_file<'a, F: FileSystem + ?Sized>(fs: &'a F, name: impl Into<String>) -> HtmlOpt<'a> {
    let name = name.into();
    HtmlOpt::new(move |h| h.inline_from_file(fs, &name))
}

/// Fluent alternative to passing options to [`Message::new`].
///
/// Calls are recorded and applied in order by [`build`](Self::build).
pub struct MessageBuilder<'a> {
    from: String,
    subject: String,
    opts: Vec<MessageOpt<'a>>,
}

impl<'a> MessageBuilder<'a> {
    pub(crate) fn new(from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            subject: subject.into(),
            opts: Vec::new(),
        }
    }

    /// Records an arbitrary option.
    pub fn option(mut self, opt: MessageOpt<'a>) -> Self {
        self.opts.push(opt);
        self
    }

    pub fn to<I, S>(self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.option(to(addrs))
    }

    pub fn cc<I, S>(self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.option(cc(addrs))
    }

    pub fn bcc<I, S>(self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.option(bcc(addrs))
    }

    /// Sets the plain body.
    pub fn plain(self, body: impl Into<String>) -> Self {
        self.option(set_plain_from_string(body))
    }

    /// Sets the HTML body with its inline resources.
    pub fn html(self, body: impl Into<String>, opts: impl IntoIterator<Item = HtmlOpt<'a>>) -> Self {
        self.option(set_html_from_string(body, opts))
    }

    /// Attaches a copy of `body`.
    pub fn attachment(
        self,
        name: impl Into<String>,
        content_type: impl Into<String>,
        body: &'a [u8],
    ) -> Self {
        self.option(attach_from_bytes(name, content_type, body))
    }

    /// Attaches a file from `fs`.
    pub fn attachment_from_file<F: FileSystem + ?Sized>(self, fs: &'a F, name: impl Into<String>) -> Self {
        self.option(attach_from_file(fs, name))
    }

    /// Applies the recorded options.
    pub fn build(self) -> EmailResult<Message> {
        Message::new(self.from, self.subject, self.opts)
    }
}

//! Template rendering for message bodies.
//!
//! [`Template`] is the capability message construction consumes.
//! [`TemplateSet`] implements it on top of `tera`, either with no escaping
//! (plain-text bodies) or with HTML auto-escaping.

use std::io::Write;

use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::EmailResult;

/// Renders data into a byte sink.
pub trait Template {
    /// Executes the default template.
    fn execute<D: Serialize + ?Sized>(&self, out: &mut dyn Write, data: &D) -> EmailResult<()>;

    /// Executes the template registered as `name`.
    fn execute_named<D: Serialize + ?Sized>(
        &self,
        name: &str,
        out: &mut dyn Write,
        data: &D,
    ) -> EmailResult<()>;
}

impl<T: Template + ?Sized> Template for &T {
    fn execute<D: Serialize + ?Sized>(&self, out: &mut dyn Write, data: &D) -> EmailResult<()> {
        (**self).execute(out, data)
    }

    fn execute_named<D: Serialize + ?Sized>(
        &self,
        name: &str,
        out: &mut dyn Write,
        data: &D,
    ) -> EmailResult<()> {
        (**self).execute_named(name, out, data)
    }
}

/// Named `tera` templates with one designated default.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    tera: Tera,
    default: &'static str,
}

impl TemplateSet {
    const TEXT_DEFAULT: &'static str = "default.txt";
    const HTML_DEFAULT: &'static str = "default.html";

    /// Creates a plain-text set whose default template is `source`.
    ///
    /// Output is never escaped.
    pub fn text(source: &str) -> EmailResult<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        Self::with_default(tera, Self::TEXT_DEFAULT, source)
    }

    /// Creates an HTML set whose default template is `source`.
    ///
    /// Every template in the set auto-escapes interpolated values.
    pub fn html(source: &str) -> EmailResult<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![""]);
        Self::with_default(tera, Self::HTML_DEFAULT, source)
    }

    fn with_default(mut tera: Tera, default: &'static str, source: &str) -> EmailResult<Self> {
        tera.add_raw_template(default, source)?;
        Ok(Self { tera, default })
    }

    /// Registers an additional template, replacing any with the same name.
    pub fn add_template(&mut self, name: &str, source: &str) -> EmailResult<()> {
        self.tera.add_raw_template(name, source)?;
        Ok(())
    }

    /// Builder-style [`add_template`](Self::add_template).
    pub fn with_template(mut self, name: &str, source: &str) -> EmailResult<Self> {
        self.add_template(name, source)?;
        Ok(self)
    }

    /// Name under which the default template is registered.
    pub fn default_name(&self) -> &str {
        self.default
    }
}

impl Template for TemplateSet {
    fn execute<D: Serialize + ?Sized>(&self, out: &mut dyn Write, data: &D) -> EmailResult<()> {
        self.execute_named(self.default, out, data)
    }

    fn execute_named<D: Serialize + ?Sized>(
        &self,
        name: &str,
        out: &mut dyn Write,
        data: &D,
    ) -> EmailResult<()> {
        let context = Context::from_serialize(data)?;
        self.tera.render_to(name, &context, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmailError;
    use serde_json::json;

    fn render(set: &TemplateSet, name: Option<&str>, data: &serde_json::Value) -> EmailResult<String> {
        let mut out = Vec::new();
        match name {
            Some(name) => set.execute_named(name, &mut out, data)?,
            None => set.execute(&mut out, data)?,
        }
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_text_does_not_escape() {
        let set = TemplateSet::text("Hello {{ name }}!").unwrap();
        let out = render(&set, None, &json!({"name": "<Bob & Co>"})).unwrap();
        assert_eq!(out, "Hello <Bob & Co>!");
    }

    #[test]
    fn test_html_escapes() {
        let set = TemplateSet::html("<p>{{ name }}</p>").unwrap();
        let out = render(&set, None, &json!({"name": "<b>"})).unwrap();
        assert_eq!(out, "<p>&lt;b&gt;</p>");
    }

    #[test]
    fn test_named_templates() {
        let set = TemplateSet::text("default {{ n }}")
            .unwrap()
            .with_template("receipt", "receipt #{{ n }}")
            .unwrap();

        assert_eq!(render(&set, Some("receipt"), &json!({"n": 7})).unwrap(), "receipt #7");
        assert_eq!(
            render(&set, Some(set.default_name()), &json!({"n": 7})).unwrap(),
            "default 7"
        );
    }

    #[test]
    fn test_unknown_template_is_template_error() {
        let set = TemplateSet::text("x").unwrap();
        let err = render(&set, Some("missing"), &json!({})).unwrap_err();
        assert!(matches!(err, EmailError::Template(_)));
    }

    #[test]
    fn test_syntax_error_on_registration() {
        let err = TemplateSet::text("{{ unterminated").unwrap_err();
        assert!(matches!(err, EmailError::Template(_)));
    }
}

//! The host environment seam and a filesystem-backed implementation.
//!
//! The resolver core never serializes HTML, builds absolute URLs, touches
//! source files or interpolates templates on its own; all of that is
//! delegated to the embedding application through [`Host`]. [`LocalHost`]
//! implements the trait for plain filesystem layouts and is what the test
//! suite drives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::{Captures, Regex};

use crate::attributes::AttributeMap;

/// Contextual values substituted into templated entry names.
///
/// Keys may be dotted paths (`site.slug`, `page.template`); the resolver
/// passes the context through to [`Host::interpolate`] untouched, so the
/// host decides how keys map onto its own objects. Typical embedders expose
/// `app`, `site` and `page` scopes.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, consuming and returning the context for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Add a value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether the context carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Capabilities the resolver borrows from its embedding application.
pub trait Host: Send + Sync {
    /// Root directory of the public index; manifest paths and the default
    /// hot file location are resolved beneath it.
    fn index_root(&self) -> &Path;

    /// Serialize a tag with the given name, inner content and attributes.
    ///
    /// Attributes mapped to `AttributeValue::Bool(false)` must be omitted
    /// and `Bool(true)` rendered as bare attributes.
    fn render_tag(&self, name: &str, inner_html: &str, attributes: &AttributeMap) -> String;

    /// Turn a path relative to the public index into a servable URL.
    fn build_url(&self, path: &str) -> String;

    /// Whether a source file exists for the given relative path.
    fn file_exists(&self, path: &str) -> bool;

    /// Substitute context values into a templated entry name.
    fn interpolate(&self, template: &str, context: &TemplateContext) -> String;

    /// Produce a random nonce of the given length.
    fn random_nonce(&self, length: usize) -> String;

    /// The template context used for entry-name interpolation.
    fn template_context(&self) -> TemplateContext {
        TemplateContext::new()
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Filesystem-backed [`Host`] for plain deployments and tests.
///
/// Entry-name templates use `{{ key }}` placeholders looked up in the
/// configured [`TemplateContext`]; unresolved placeholders are left verbatim
/// so purely static names survive interpolation unchanged. Source existence
/// checks consult the base root (falling back to the index root) and the
/// parent of the index root, in that order.
#[derive(Debug, Clone)]
pub struct LocalHost {
    index_root: PathBuf,
    base_root: Option<PathBuf>,
    base_url: String,
    context: TemplateContext,
}

impl LocalHost {
    /// Create a host rooted at the given public index directory.
    pub fn new(index_root: impl Into<PathBuf>) -> Self {
        Self {
            index_root: index_root.into(),
            base_root: None,
            base_url: String::new(),
            context: TemplateContext::new(),
        }
    }

    /// Use a dedicated base directory for source existence checks.
    pub fn with_base_root(mut self, base_root: impl Into<PathBuf>) -> Self {
        self.base_root = Some(base_root.into());
        self
    }

    /// Prefix generated URLs with the given base (scheme/host or subpath).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Supply the template context handed to entry-name interpolation.
    pub fn with_context(mut self, context: TemplateContext) -> Self {
        self.context = context;
        self
    }
}

impl Host for LocalHost {
    fn index_root(&self) -> &Path {
        &self.index_root
    }

    fn render_tag(&self, name: &str, inner_html: &str, attributes: &AttributeMap) -> String {
        let mut rendered = format!("<{name}");
        for (key, value) in attributes {
            if !value.is_rendered() {
                continue;
            }
            match value.as_str() {
                Some(value) => {
                    rendered.push_str(&format!(" {key}=\"{}\"", escape_attribute(value)));
                }
                None => {
                    rendered.push(' ');
                    rendered.push_str(key);
                }
            }
        }
        rendered.push('>');

        if !VOID_ELEMENTS.contains(&name) {
            rendered.push_str(inner_html);
            rendered.push_str(&format!("</{name}>"));
        }

        rendered
    }

    fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn file_exists(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        let base = self.base_root.as_deref().unwrap_or(&self.index_root);

        if base.join(path).exists() {
            return true;
        }
        self.index_root
            .parent()
            .is_some_and(|parent| parent.join(path).exists())
    }

    fn interpolate(&self, template: &str, context: &TemplateContext) -> String {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let pattern = PLACEHOLDER.get_or_init(|| {
            Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("invalid placeholder regex")
        });

        pattern
            .replace_all(template, |caps: &Captures<'_>| {
                match context.get(&caps[1]) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn random_nonce(&self, length: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    fn template_context(&self) -> TemplateContext {
        self.context.clone()
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn renders_tags_with_sorted_escaped_attributes() {
        let host = LocalHost::new(".");
        let mut attributes = AttributeMap::new();
        attributes.insert("src".to_string(), "/build/app.js?a=1&b=\"2\"".into());
        attributes.insert("type".to_string(), "module".into());
        attributes.insert("defer".to_string(), true.into());
        attributes.insert("integrity".to_string(), false.into());

        let tag = host.render_tag("script", "", &attributes);

        assert_eq!(
            tag,
            "<script defer src=\"/build/app.js?a=1&amp;b=&quot;2&quot;\" type=\"module\"></script>"
        );
    }

    #[test]
    fn renders_void_elements_without_closing_tag() {
        let host = LocalHost::new(".");
        let mut attributes = AttributeMap::new();
        attributes.insert("rel".to_string(), "stylesheet".into());
        attributes.insert("href".to_string(), "/build/app.css".into());

        let tag = host.render_tag("link", "", &attributes);

        assert_eq!(tag, "<link href=\"/build/app.css\" rel=\"stylesheet\">");
    }

    #[test]
    fn builds_urls_under_the_configured_base() {
        let host = LocalHost::new(".").with_base_url("https://cdn.example.com/");
        assert_eq!(
            host.build_url("build/app.js"),
            "https://cdn.example.com/build/app.js"
        );

        let rootless = LocalHost::new(".");
        assert_eq!(rootless.build_url("build/app.js"), "/build/app.js");
    }

    #[test]
    fn interpolates_known_placeholders_and_keeps_unknown_ones() {
        let host = LocalHost::new(".");
        let context = TemplateContext::new()
            .with("site.slug", "docs")
            .with("page", "home");

        assert_eq!(
            host.interpolate("src/{{ site.slug }}/{{page}}.js", &context),
            "src/docs/home.js"
        );
        assert_eq!(
            host.interpolate("src/{{ missing }}.js", &context),
            "src/{{ missing }}.js"
        );
    }

    #[test]
    fn checks_source_files_under_base_and_index_parent() {
        let temp = tempdir().expect("failed to create temp dir");
        let index_root = temp.path().join("public");
        fs::create_dir_all(&index_root).expect("failed to create index root");
        fs::write(index_root.join("in-index.js"), "export {}").expect("write failed");
        fs::write(temp.path().join("above-index.js"), "export {}").expect("write failed");

        let host = LocalHost::new(&index_root);
        assert!(host.file_exists("in-index.js"));
        assert!(host.file_exists("above-index.js"));
        assert!(!host.file_exists("missing.js"));

        let base = temp.path().join("resources");
        fs::create_dir_all(&base).expect("failed to create base root");
        fs::write(base.join("in-base.js"), "export {}").expect("write failed");

        let based = LocalHost::new(&index_root).with_base_root(&base);
        assert!(based.file_exists("in-base.js"));
        assert!(!based.file_exists("in-index.js"));
        assert!(based.file_exists("above-index.js"));
    }

    #[test]
    fn generates_alphanumeric_nonces_of_requested_length() {
        let host = LocalHost::new(".");
        let nonce = host.random_nonce(40);

        assert_eq!(nonce.len(), 40);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, host.random_nonce(40));
    }
}

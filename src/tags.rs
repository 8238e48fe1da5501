//! Style-path detection and the per-call tag collection.

use std::sync::OnceLock;

use regex::Regex;

/// Determine whether an output path names a stylesheet.
///
/// The extension list matches what the build tool treats as style sources:
/// plain css plus the preprocessor dialects it compiles.
pub fn is_style_path(path: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"\.(css|less|sass|scss|styl|stylus|pcss|postcss)$")
                .expect("invalid style extension regex")
        })
        .is_match(path)
}

/// Tags collected during one `resolve` call, keyed by output file path.
///
/// Each distinct output file contributes at most one tag; insertion order is
/// preserved until the final stable sort pushes stylesheet tags behind
/// script and modulepreload tags.
#[derive(Debug, Default)]
pub(crate) struct TagList {
    entries: Vec<(String, String)>,
}

impl TagList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, file: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == file)
    }

    pub(crate) fn push(&mut self, file: String, tag: String) {
        self.entries.push((file, tag));
    }

    /// Stable sort moving style outputs behind everything else.
    ///
    /// Ties keep their insertion order, so discovery order still decides the
    /// relative position of scripts among scripts and styles among styles.
    pub(crate) fn sort_styles_last(&mut self) {
        self.entries.sort_by_key(|(file, _)| is_style_path(file));
    }

    pub(crate) fn into_markup(self) -> String {
        self.entries.into_iter().map(|(_, tag)| tag).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_stylesheet_extensions() {
        for path in [
            "app.css",
            "app.less",
            "app.sass",
            "app.scss",
            "app.styl",
            "app.stylus",
            "app.pcss",
            "app.postcss",
        ] {
            assert!(is_style_path(path), "{path} should be a style path");
        }
    }

    #[test]
    fn keeps_scripts_and_other_assets_as_non_style() {
        assert!(!is_style_path("app.js"));
        assert!(!is_style_path("logo.png"));
        assert!(!is_style_path("styles.css.map"));
    }

    #[test]
    fn sorts_styles_behind_scripts_preserving_insertion_order() {
        let mut tags = TagList::new();
        tags.push("a.css".to_string(), "<a-css>".to_string());
        tags.push("a.js".to_string(), "<a-js>".to_string());
        tags.push("b.css".to_string(), "<b-css>".to_string());
        tags.push("b.js".to_string(), "<b-js>".to_string());

        tags.sort_styles_last();

        assert_eq!(tags.into_markup(), "<a-js><b-js><a-css><b-css>");
    }

    #[test]
    fn tracks_already_collected_files() {
        let mut tags = TagList::new();
        tags.push("a.js".to_string(), "<a>".to_string());

        assert!(tags.contains("a.js"));
        assert!(!tags.contains("b.js"));
    }
}

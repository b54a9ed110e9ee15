//! User-facing text lookup.
//!
//! Components that produce text for the user or the provider (prompt guidance,
//! parse diagnostics, conversation names, error prefixes) receive a
//! [`Localizer`] once at construction instead of threading a translation
//! function through every call.

use anyhow::Context;
use serde_json::Value;
use std::path::Path;

const BUILTIN_EN: &str = include_str!("../locales/en.json");
const BUILTIN_VI: &str = include_str!("../locales/vi.json");

pub const DEFAULT_LOCALE: &str = "en";

pub trait Localizer: Send + Sync {
    fn locale(&self) -> &str;

    /// Raw template for a dotted key such as `chat.errorPrefix`.
    fn lookup(&self, key: &str) -> Option<String>;

    /// Template with `{name}` placeholders substituted. Missing keys render as the key itself.
    fn format(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let template = self.lookup(key).unwrap_or_else(|| key.to_string());
        substitute(&template, vars)
    }

    fn text(&self, key: &str) -> String {
        self.format(key, &[])
    }
}

fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

/// Nested JSON string table with an optional fallback catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    locale: String,
    root: Value,
    fallback: Option<Box<Catalog>>,
}

impl Catalog {
    pub fn from_json_str(locale: impl Into<String>, json: &str) -> anyhow::Result<Self> {
        let root: Value = serde_json::from_str(json).context("Failed to parse locale catalog JSON")?;
        if !root.is_object() {
            anyhow::bail!("Locale catalog must be a JSON object");
        }
        Ok(Self {
            locale: locale.into(),
            root,
            fallback: None,
        })
    }

    pub fn english() -> Self {
        // The embedded catalog is a compile-time asset covered by tests.
        Self::from_json_str("en", BUILTIN_EN).unwrap_or_else(|e| {
            log::error!("Built-in English catalog is invalid: {:?}", e);
            Self {
                locale: "en".to_string(),
                root: Value::Object(Default::default()),
                fallback: None,
            }
        })
    }

    /// Built-in catalog for `locale`, falling back to English for unknown locales and missing keys.
    pub fn builtin(locale: &str) -> Self {
        match locale {
            "vi" => match Self::from_json_str("vi", BUILTIN_VI) {
                Ok(vi) => vi.with_fallback(Self::english()),
                Err(e) => {
                    log::error!("Built-in Vietnamese catalog is invalid: {:?}", e);
                    Self::english()
                }
            },
            "en" => Self::english(),
            other => {
                log::warn!("Locale '{}' is not supported, using '{}'", other, DEFAULT_LOCALE);
                Self::english()
            }
        }
    }

    /// Loads `<dir>/<locale>.json`, layered over the built-in catalog for the same locale.
    pub fn load(dir: &Path, locale: &str) -> anyhow::Result<Self> {
        let path = dir.join(format!("{}.json", locale));
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read locale file {}", path.display()))?;
        log::info!("Loaded locale overrides from {}", path.display());
        Ok(Self::from_json_str(locale, &contents)?.with_fallback(Self::builtin(locale)))
    }

    pub fn with_fallback(mut self, fallback: Catalog) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

impl Localizer for Catalog {
    fn locale(&self) -> &str {
        &self.locale
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let found = key
            .split('.')
            .try_fold(&self.root, |node, segment| node.get(segment))
            .and_then(Value::as_str)
            .map(str::to_string);
        found.or_else(|| self.fallback.as_ref().and_then(|f| f.lookup(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogs_parse() {
        assert!(Catalog::from_json_str("en", BUILTIN_EN).is_ok());
        assert!(Catalog::from_json_str("vi", BUILTIN_VI).is_ok());
    }

    #[test]
    fn test_lookup_nested_key_and_substitute() {
        let catalog = Catalog::english();
        assert_eq!(
            catalog.format("chat.stagedFiles", &[("count", "2")]),
            "2 file(s) attached"
        );
        assert_eq!(
            catalog.format("chatHistory.fileChatName", &[("count", "1"), ("fileName", "a.png")]),
            "1 file(s): a.png"
        );
    }

    #[test]
    fn test_missing_key_renders_as_key() {
        let catalog = Catalog::english();
        assert_eq!(catalog.text("no.such.key"), "no.such.key");
    }

    #[test]
    fn test_vietnamese_falls_back_to_english_for_missing_keys() {
        let vi = Catalog::from_json_str("vi", r#"{"chat": {"typing": "Đang gõ"}}"#)
            .unwrap()
            .with_fallback(Catalog::english());
        assert_eq!(vi.text("chat.typing"), "Đang gõ");
        assert_eq!(vi.text("chat.emptyContent"), "Empty content");
        assert_eq!(vi.locale(), "vi");
    }

    #[test]
    fn test_unknown_locale_uses_english() {
        assert_eq!(Catalog::builtin("fr").locale(), "en");
    }

    #[test]
    fn test_placeholder_braces_in_template_survive() {
        let catalog = Catalog::english();
        let guidance = catalog.format("gemini.systemPromptAnalysis.base", &[("query", "Hello")]);
        assert!(guidance.contains("\"Hello\""));
        assert!(guidance.contains("{\"riskLevel\""));
    }

    #[test]
    fn test_load_from_directory_layers_over_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("en.json"),
            r#"{"chat": {"typing": "Thinking..."}}"#,
        )
        .unwrap();
        let catalog = Catalog::load(dir.path(), "en").unwrap();
        assert_eq!(catalog.text("chat.typing"), "Thinking...");
        assert_eq!(catalog.text("chat.errorPrefix"), "Sorry, I encountered an issue:");
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Catalog::load(dir.path(), "en").is_err());
    }
}

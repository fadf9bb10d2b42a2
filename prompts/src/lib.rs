//! Named prompt templates with placeholder substitution.
//!
//! Templates live in a TOML file mapping `name → template`. Placeholders are
//! written `{name}`; doubled braces (`{{`, `}}`) render as literal braces.
//! Substitution is a single pass, so braces inside substituted values are
//! never re-interpreted. Rendering the same template with the same variables
//! is deterministic.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

/// The templates bundled with the crate, used when no `prompts_path` is
/// configured.
const BUILTIN_PROMPTS: &str = include_str!("../assets/prompts.toml");

#[derive(Debug, Error)]
pub enum PromptError {
    /// No template with the requested name.
    #[error("unknown prompt: {0}")]
    Missing(String),

    /// A placeholder in the template had no binding.
    #[error("prompt '{prompt}' has no binding for placeholder '{placeholder}'")]
    PlaceholderMissing { prompt: String, placeholder: String },

    /// A `{` without a matching `}`.
    #[error("prompt '{prompt}' has an unterminated placeholder")]
    Unterminated { prompt: String },

    /// The template file could not be read or parsed.
    #[error("failed to load prompts from {path}: {reason}")]
    Load { path: String, reason: String },
}

/// An immutable set of named templates.
#[derive(Debug, Clone)]
pub struct PromptStore {
    templates: BTreeMap<String, String>,
}

impl PromptStore {
    /// The compiled-in default templates.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_PROMPTS, "<builtin>")
            .expect("bundled prompts.toml is well-formed")
    }

    /// Load templates from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, PromptError> {
        let text = std::fs::read_to_string(path).map_err(|e| PromptError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    /// Parse a TOML document of `name = "template"` pairs.
    pub fn from_toml_str(text: &str, source: &str) -> Result<Self, PromptError> {
        let templates: BTreeMap<String, String> =
            toml::from_str(text).map_err(|e| PromptError::Load {
                path: source.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { templates })
    }

    /// Names of all loaded templates.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Render a template, substituting every `{placeholder}` from `vars`.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| PromptError::Missing(name.to_string()))?;

        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut placeholder = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => placeholder.push(c),
                            None => {
                                return Err(PromptError::Unterminated {
                                    prompt: name.to_string(),
                                });
                            }
                        }
                    }
                    let value = vars
                        .iter()
                        .find(|(k, _)| *k == placeholder)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| PromptError::PlaceholderMissing {
                            prompt: name.to_string(),
                            placeholder: placeholder.clone(),
                        })?;
                    out.push_str(value);
                }
                c => out.push(c),
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(toml: &str) -> PromptStore {
        PromptStore::from_toml_str(toml, "<test>").unwrap()
    }

    #[test]
    fn renders_placeholders() {
        let store = store(r#"greet = "Hello {name}, you asked: {query}""#);
        let out = store
            .render("greet", &[("name", "Ada"), ("query", "why?")])
            .unwrap();
        assert_eq!(out, "Hello Ada, you asked: why?");
    }

    #[test]
    fn rendering_is_deterministic() {
        let store = store(r#"t = "{a} and {b}""#);
        let vars = [("a", "x"), ("b", "y")];
        assert_eq!(
            store.render("t", &vars).unwrap(),
            store.render("t", &vars).unwrap()
        );
    }

    #[test]
    fn doubled_braces_render_literally() {
        let store = store(r#"t = "JSON like {{\"score\": {n}}}""#);
        let out = store.render("t", &[("n", "5")]).unwrap();
        assert_eq!(out, "JSON like {\"score\": 5}");
    }

    #[test]
    fn braces_in_values_are_not_reinterpreted() {
        let store = store(r#"t = "content: {body}""#);
        let out = store.render("t", &[("body", "{not_a_placeholder}")]).unwrap();
        assert_eq!(out, "content: {not_a_placeholder}");
    }

    #[test]
    fn unknown_prompt_errors() {
        let store = store(r#"t = "x""#);
        assert!(matches!(
            store.render("missing", &[]),
            Err(PromptError::Missing(_))
        ));
    }

    #[test]
    fn unbound_placeholder_errors() {
        let store = store(r#"t = "{a} {b}""#);
        let err = store.render("t", &[("a", "x")]).unwrap_err();
        match err {
            PromptError::PlaceholderMissing { placeholder, .. } => {
                assert_eq!(placeholder, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unterminated_placeholder_errors() {
        let store = store(r#"t = "broken {tail""#);
        assert!(matches!(
            store.render("t", &[("tail", "x")]),
            Err(PromptError::Unterminated { .. })
        ));
    }

    #[test]
    fn builtin_templates_parse_and_render() {
        let store = PromptStore::builtin();
        for name in [
            "system",
            "expand_queries",
            "relevance_score",
            "summarize_content",
            "merge_summaries",
        ] {
            assert!(store.names().any(|n| n == name), "missing template {name}");
        }

        let out = store
            .render("expand_queries", &[("count", "3"), ("query", "rust async")])
            .unwrap();
        assert!(out.contains("rust async"));
        assert!(out.contains("{\"queries\""));
    }
}

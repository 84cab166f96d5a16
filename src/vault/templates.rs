//! Template interpolation
//!
//! `{{key}}` and `<% key %>` placeholders are replaced from a context object.
//! Placeholders without a context entry are left as written.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::VaultError;
use crate::vault::notes::Vault;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([\w.-]+)\s*\}\}|<%\s*([\w.-]+)\s*%>").expect("valid placeholder pattern")
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderArgs {
    /// Template text, or the path of a note in the vault to use as the template
    pub template: String,

    /// Values substituted for placeholders
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Substitute every known placeholder in `template`
pub fn interpolate(template: &str, context: &Map<String, Value>) -> String {
    placeholder_pattern()
        .replace_all(template, |captures: &Captures| {
            let key = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map_or("", |m| m.as_str());
            match context.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}

/// Render `args.template`, reading it from the vault when it names a note
pub fn render(vault: &Vault, args: &RenderArgs) -> Result<String, VaultError> {
    let template = if args.template.ends_with(".md") {
        match vault.read_note(&args.template) {
            Ok(contents) => contents,
            Err(VaultError::NotFound { .. }) => args.template.clone(),
            Err(e) => return Err(e),
        }
    } else {
        args.template.clone()
    };
    Ok(interpolate(&template, &args.context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn context(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_both_placeholder_styles() {
        let ctx = context(json!({"title": "Weekly", "count": 3}));
        assert_eq!(
            interpolate("# {{title}} ({{ count }}) <% title %>", &ctx),
            "# Weekly (3) Weekly"
        );
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let ctx = context(json!({}));
        assert_eq!(interpolate("Hello {{name}} <% tp.date %>", &ctx), "Hello {{name}} <% tp.date %>");
    }

    #[test]
    fn test_render_from_note() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("daily.md"), "Date: {{date}}").unwrap();
        let vault = Vault::new(dir.path());

        let args = RenderArgs {
            template: "daily.md".to_string(),
            context: context(json!({"date": "2024-05-01"})),
        };
        assert_eq!(render(&vault, &args).unwrap(), "Date: 2024-05-01");

        let inline = RenderArgs {
            template: "Hi {{who}}".to_string(),
            context: context(json!({"who": "there"})),
        };
        assert_eq!(render(&vault, &inline).unwrap(), "Hi there");
    }
}

//! Template engine — YAML values templates with `<TOKEN>` placeholders
//!
//! Placeholder matching is shared by discovery and substitution:
//! - the trimmed scalar is exactly `<NAME>` (whole-value placeholder), or
//! - the scalar embeds one or more `<NAME>` occurrences.
//!
//! `NAME` is any non-empty run of characters other than `<`, `>` and whitespace.
//! Only string scalars are inspected; mapping keys are never rewritten.

mod emit;

use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub use emit::to_quoted_yaml;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{name}' unavailable: {local} does not exist and remote fetch failed: {reason}")]
    Load { name: String, local: String, reason: String },

    #[error("template '{name}' is not valid YAML: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write {path}: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a template comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub local_path: PathBuf,
    pub remote_url: Option<String>,
}

/// Loads, inspects and renders values templates
#[derive(Clone)]
pub struct TemplateEngine {
    http: reqwest::Client,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Parse the local file if present, otherwise fetch the remote URL.
    pub async fn load_document(&self, source: &TemplateSource) -> Result<Value, TemplateError> {
        let local = source.local_path.display().to_string();
        if source.local_path.exists() {
            debug!("Loading template {} from {}", source.name, local);
            let text = tokio::fs::read_to_string(&source.local_path).await
                .map_err(|e| TemplateError::Load {
                    name: source.name.clone(),
                    local: local.clone(),
                    reason: e.to_string(),
                })?;
            return parse(&source.name, &text);
        }

        let Some(url) = source.remote_url.as_deref() else {
            return Err(TemplateError::Load {
                name: source.name.clone(),
                local,
                reason: "no remote URL configured".to_string(),
            });
        };

        info!("Template {} not found locally, fetching {}", source.name, url);
        let load_err = |reason: String| TemplateError::Load {
            name: source.name.clone(),
            local: local.clone(),
            reason,
        };
        let resp = self.http.get(url).send().await.map_err(|e| load_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(load_err(format!("{} returned {}", url, resp.status())));
        }
        let text = resp.text().await.map_err(|e| load_err(e.to_string()))?;
        parse(&source.name, &text)
    }
}

fn parse(name: &str, text: &str) -> Result<Value, TemplateError> {
    serde_yaml::from_str(text).map_err(|source| TemplateError::Parse {
        name: name.to_string(),
        source,
    })
}

/// The whole-value placeholder name, if the trimmed text is exactly `<NAME>`
fn exact_token(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix('<')?.strip_suffix('>')?;
    is_token_name(inner).then_some(inner)
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['<', '>']) && !name.chars().any(char::is_whitespace)
}

/// Every `<NAME>` embedded in `text`, in order of appearance
fn embedded_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(['<', '>']) else { break };
        if after.as_bytes()[close] == b'>' && is_token_name(&after[..close]) {
            tokens.push(&after[..close]);
            rest = &after[close + 1..];
        } else {
            rest = &after[close..];
        }
    }
    tokens
}

fn tokens_of(text: &str) -> Vec<&str> {
    match exact_token(text) {
        Some(name) => vec![name],
        None => embedded_tokens(text),
    }
}

/// All placeholder names in the document, sorted
pub fn discover_placeholders(doc: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect(doc, &mut found);
    found
}

fn collect(node: &Value, found: &mut BTreeSet<String>) {
    match node {
        Value::String(s) => {
            found.extend(tokens_of(s).into_iter().map(str::to_string));
        }
        Value::Sequence(items) => items.iter().for_each(|item| collect(item, found)),
        Value::Mapping(map) => map.values().for_each(|v| collect(v, found)),
        Value::Tagged(tagged) => collect(&tagged.value, found),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Substitute known placeholders, returning a new document. Unknown
/// placeholders stay as literal text.
pub fn substitute(doc: &Value, variables: &BTreeMap<String, String>) -> Value {
    match doc {
        Value::String(s) => Value::String(substitute_str(s, variables)),
        Value::Sequence(items) => {
            Value::Sequence(items.iter().map(|item| substitute(item, variables)).collect())
        }
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, variables)))
                .collect(),
        ),
        Value::Tagged(tagged) => {
            let mut tagged = tagged.as_ref().clone();
            tagged.value = substitute(&tagged.value, variables);
            Value::Tagged(Box::new(tagged))
        }
        other => other.clone(),
    }
}

fn substitute_str(text: &str, variables: &BTreeMap<String, String>) -> String {
    if let Some(name) = exact_token(text) {
        return match variables.get(name) {
            Some(value) => value.clone(),
            None => text.to_string(),
        };
    }
    let mut out = text.to_string();
    for name in embedded_tokens(text) {
        if let Some(value) = variables.get(name) {
            out = out.replace(&format!("<{}>", name), value);
        }
    }
    out
}

/// Serialize with double-quoted string scalars and write to `dest`,
/// creating parent directories as needed.
pub fn render_to_file(doc: &Value, dest: &Path) -> Result<(), TemplateError> {
    let render_err = |source| TemplateError::Render { path: dest.to_path_buf(), source };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(render_err)?;
    }
    std::fs::write(dest, to_quoted_yaml(doc)).map_err(render_err)?;
    debug!("Rendered {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUES: &str = r#"
domain: <DOMAIN>
client:
  url: "https://<DOMAIN>:<PORT>/app"
  replicas: 1
  enabled: true
api:
  env:
    - name: MYSQL_PASSWORD
      value: "  <MYSQL_PASSWORD>  "
    - name: UNTOUCHED
      value: plain
  note: "a < b and c > d"
"#;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn discovers_whole_and_embedded_tokens_sorted() {
        let doc: Value = serde_yaml::from_str(VALUES).unwrap();
        let found: Vec<_> = discover_placeholders(&doc).into_iter().collect();
        assert_eq!(found, vec!["DOMAIN", "MYSQL_PASSWORD", "PORT"]);
    }

    #[test]
    fn comparison_operators_are_not_tokens() {
        assert!(embedded_tokens("a < b and c > d").is_empty());
        assert_eq!(embedded_tokens("<<A>>"), vec!["A"]);
        assert_eq!(exact_token(" <A> "), Some("A"));
        assert_eq!(exact_token("<A><B>"), None);
    }

    #[test]
    fn substitutes_known_tokens_and_keeps_unknown() {
        let doc: Value = serde_yaml::from_str(VALUES).unwrap();
        let out = substitute(&doc, &vars(&[("DOMAIN", "local.dev"), ("MYSQL_PASSWORD", "secret")]));

        assert_eq!(out["domain"], Value::String("local.dev".into()));
        assert_eq!(out["client"]["url"], Value::String("https://local.dev:<PORT>/app".into()));
        assert_eq!(out["api"]["env"][0]["value"], Value::String("secret".into()));
        assert_eq!(out["client"]["replicas"], doc["client"]["replicas"]);

        let remaining = discover_placeholders(&out);
        assert_eq!(remaining.into_iter().collect::<Vec<_>>(), vec!["PORT"]);
    }

    #[test]
    fn substitution_does_not_touch_input() {
        let doc: Value = serde_yaml::from_str(VALUES).unwrap();
        let before = doc.clone();
        let _ = substitute(&doc, &vars(&[("DOMAIN", "x")]));
        assert_eq!(doc, before);
    }

    #[test]
    fn substitution_is_idempotent() {
        let doc: Value = serde_yaml::from_str(VALUES).unwrap();
        let map = vars(&[("DOMAIN", "local.dev"), ("PORT", "3000")]);
        let once = substitute(&doc, &map);
        let twice = substitute(&once, &map);
        assert_eq!(once, twice);
    }

    #[test]
    fn full_map_resolves_every_discovered_token() {
        let doc: Value = serde_yaml::from_str(VALUES).unwrap();
        let map: BTreeMap<String, String> = discover_placeholders(&doc)
            .into_iter()
            .map(|k| (k.clone(), format!("v-{}", k.to_lowercase())))
            .collect();
        let out = substitute(&doc, &map);
        assert!(discover_placeholders(&out).is_empty());
        assert_eq!(out["api"]["note"], Value::String("a < b and c > d".into()));
    }

    #[test]
    fn render_creates_parents_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("configs/nested/abc-values.yaml");
        let doc: Value = serde_yaml::from_str(VALUES).unwrap();

        render_to_file(&doc, &dest).unwrap();

        let text = std::fs::read_to_string(&dest).unwrap();
        assert!(text.contains("domain: \"<DOMAIN>\""));
        let reparsed: Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[tokio::test]
    async fn load_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.yaml");
        std::fs::write(&path, "a: <X>\n").unwrap();
        let source = TemplateSource {
            name: "values".into(),
            local_path: path,
            remote_url: Some("http://127.0.0.1:9/unreachable.yaml".into()),
        };
        let doc = TemplateEngine::new().load_document(&source).await.unwrap();
        assert_eq!(doc["a"], Value::String("<X>".into()));
    }

    #[tokio::test]
    async fn load_fails_without_any_source() {
        let source = TemplateSource {
            name: "values".into(),
            local_path: PathBuf::from("/nonexistent/values.yaml"),
            remote_url: None,
        };
        let err = TemplateEngine::new().load_document(&source).await.unwrap_err();
        assert!(matches!(err, TemplateError::Load { .. }));
    }
}

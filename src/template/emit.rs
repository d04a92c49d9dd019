//! Block-style YAML emitter that double-quotes every string scalar.
//!
//! serde_yaml picks its own quoting, which leaves values like `<DOMAIN>` or
//! `on` open to reinterpretation by helm. JSON string syntax is a valid YAML
//! double-quoted scalar, so serde_json does the escaping.

use serde_yaml::Value;

pub fn to_quoted_yaml(doc: &Value) -> String {
    let mut out = String::new();
    match inline(doc) {
        Some(line) => {
            out.push_str(&line);
            out.push('\n');
        }
        None => {
            for line in block_lines(doc) {
                out.push_str(&line);
                out.push('\n');
            }
        }
    }
    out
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// Single-line form for scalars and empty collections
fn inline(node: &Value) -> Option<String> {
    match node {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(quote(s)),
        Value::Sequence(items) if items.is_empty() => Some("[]".to_string()),
        Value::Mapping(map) if map.is_empty() => Some("{}".to_string()),
        Value::Tagged(tagged) => inline(&tagged.value).map(|v| format!("{} {}", tagged.tag, v)),
        _ => None,
    }
}

fn key(node: &Value) -> String {
    match node {
        Value::String(s) if is_plain_key(s) => s.clone(),
        other => inline(other).unwrap_or_else(|| quote(&format!("{:?}", other))),
    }
}

fn is_plain_key(s: &str) -> bool {
    let Some(first) = s.chars().next() else { return false };
    (first.is_ascii_alphabetic() || first == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./".contains(c))
        && !matches!(s, "true" | "false" | "null" | "yes" | "no" | "on" | "off" | "y" | "n")
}

/// Tag suffix placed after `key:` or `-` when a tagged value needs a block
fn tag_suffix(node: &Value) -> String {
    match node {
        Value::Tagged(tagged) => format!(" {}", tagged.tag),
        _ => String::new(),
    }
}

fn untagged(node: &Value) -> &Value {
    match node {
        Value::Tagged(tagged) => untagged(&tagged.value),
        other => other,
    }
}

/// Lines of a non-inline node, indented relative to its parent
fn block_lines(node: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    match untagged(node) {
        Value::Mapping(map) => {
            for (k, v) in map {
                match inline(v) {
                    Some(value) => lines.push(format!("{}: {}", key(k), value)),
                    None => {
                        lines.push(format!("{}:{}", key(k), tag_suffix(v)));
                        lines.extend(block_lines(v).into_iter().map(|l| format!("  {}", l)));
                    }
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                match inline(item) {
                    Some(value) => lines.push(format!("- {}", value)),
                    None if matches!(item, Value::Tagged(_)) => {
                        lines.push(format!("-{}", tag_suffix(item)));
                        lines.extend(block_lines(item).into_iter().map(|l| format!("  {}", l)));
                    }
                    None => {
                        let mut child = block_lines(item).into_iter();
                        if let Some(first) = child.next() {
                            lines.push(format!("- {}", first));
                        }
                        lines.extend(child.map(|l| format!("  {}", l)));
                    }
                }
            }
        }
        other => lines.extend(inline(other)),
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_double_quoted_and_keys_plain() {
        let doc: Value = serde_yaml::from_str("a: x\nb: 2\nc: true\nd: null\n").unwrap();
        assert_eq!(to_quoted_yaml(&doc), "a: \"x\"\nb: 2\nc: true\nd: null\n");
    }

    #[test]
    fn nested_sequences_of_mappings() {
        let src = "env:\n  - name: A\n    value: \"1\"\n  - name: B\n    value: two\nempty: []\n";
        let doc: Value = serde_yaml::from_str(src).unwrap();
        let out = to_quoted_yaml(&doc);
        assert_eq!(
            out,
            "env:\n  - name: \"A\"\n    value: \"1\"\n  - name: \"B\"\n    value: \"two\"\nempty: []\n"
        );
        let reparsed: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn awkward_keys_and_values_survive() {
        let src = "\"on\": \"yes\"\n\"with space\": \"line1\\nline2\"\n\"1st\": [\"a\", \"b\"]\n";
        let doc: Value = serde_yaml::from_str(src).unwrap();
        let reparsed: Value = serde_yaml::from_str(&to_quoted_yaml(&doc)).unwrap();
        assert_eq!(reparsed, doc);
    }
}

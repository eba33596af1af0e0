/// Expression resolver for node configs
///
/// Substitutes whole-string placeholder values like
/// "{{swap-1.output.quote.to_amount}}" with data produced by previously
/// executed nodes. Only top-level string entries that are entirely a single
/// placeholder are touched; everything else passes through unchanged. No
/// partial in-string interpolation. The path language is deliberately tiny:
/// dotted fields plus single bracket indices, walked recursively, not a
/// general expression evaluator.

use serde_json::{Map, Value};

use crate::error::ResolveError;

/// Resolve every placeholder entry of `config` against `context`
/// (the accumulated execution data, keyed by node id).
pub fn resolve_config(
    config: &Value,
    context: &Map<String, Value>,
) -> Result<Value, ResolveError> {
    let Value::Object(map) = config else {
        return Ok(config.clone());
    };

    let mut resolved = Map::new();
    for (key, value) in map {
        let entry = match value {
            Value::String(s) => match placeholder_path(s) {
                Some(path) => {
                    let found =
                        walk(context, &path).ok_or_else(|| ResolveError::PathNotFound {
                            placeholder: s.clone(),
                            path: path.clone(),
                        })?;
                    tracing::debug!("🔗 Resolved '{}' -> {}", s, found);
                    found.clone()
                }
                None => value.clone(),
            },
            other => other.clone(),
        };
        resolved.insert(key.clone(), entry);
    }

    Ok(Value::Object(resolved))
}

/// The path inside "{{ ... }}" when the string is entirely one placeholder
fn placeholder_path(s: &str) -> Option<String> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains('{') || inner.contains('}') {
        return None;
    }
    let path = inner.trim();
    if path.is_empty() {
        return None;
    }
    Some(path.to_string())
}

#[derive(Debug, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Walk the parsed path into the context. None when any hop is missing.
fn walk<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse_segments(path)?;
    let mut iter = segments.into_iter();

    let mut current = match iter.next()? {
        Segment::Field(name) => context.get(&name)?,
        Segment::Index(_) => return None,
    };

    for segment in iter {
        current = match segment {
            Segment::Field(name) => current.get(&name)?,
            Segment::Index(i) => current.get(i)?,
        };
    }

    Some(current)
}

/// Split "a.b['c'][0].d" into field and index segments
fn parse_segments(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut field = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
            }
            '[' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
                let mut content = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(inner) => content.push(inner),
                        None => return None,
                    }
                }
                let content = content.trim();
                let quoted = (content.starts_with('\'') && content.ends_with('\''))
                    || (content.starts_with('"') && content.ends_with('"'));
                if quoted && content.len() >= 2 {
                    segments.push(Segment::Field(content[1..content.len() - 1].to_string()));
                } else {
                    segments.push(Segment::Index(content.parse().ok()?));
                }
            }
            other => field.push(other),
        }
    }

    if !field.is_empty() {
        segments.push(Segment::Field(field));
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with(node_id: &str, output: Value) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert(node_id.to_string(), json!({ "output": output }));
        context
    }

    #[test]
    fn upstream_output_flows_into_downstream_config() {
        // Node B references field x of node A's output and receives the
        // literal value A produced.
        let context = context_with("a", json!({ "x": 42 }));
        let config = json!({ "amount": "{{a.output.x}}" });

        let resolved = resolve_config(&config, &context).unwrap();
        assert_eq!(resolved["amount"], json!(42));
    }

    #[test]
    fn nested_fields_and_bracket_indices_resolve() {
        let context = context_with(
            "swap-1",
            json!({ "quote": { "route": [{ "toTokenAddress": "0xdef" }], "to_amount": "99" } }),
        );

        let config = json!({
            "target": "{{swap-1.output.quote.route[0].toTokenAddress}}",
            "amount": "{{ swap-1.output.quote.to_amount }}",
            "bracket_field": "{{swap-1.output['quote'].to_amount}}",
        });

        let resolved = resolve_config(&config, &context).unwrap();
        assert_eq!(resolved["target"], json!("0xdef"));
        assert_eq!(resolved["amount"], json!("99"));
        assert_eq!(resolved["bracket_field"], json!("99"));
    }

    #[test]
    fn missing_path_errors_with_path_and_placeholder() {
        let config = json!({ "value": "{{nonexistent_node.output.value}}" });
        let err = resolve_config(&config, &Map::new()).unwrap_err();

        let ResolveError::PathNotFound { placeholder, path } = err;
        assert_eq!(placeholder, "{{nonexistent_node.output.value}}");
        assert_eq!(path, "nonexistent_node.output.value");
    }

    #[test]
    fn non_placeholders_pass_through_untouched() {
        let context = context_with("a", json!({ "x": 1 }));
        let config = json!({
            "plain": "just a string",
            "partial": "value is {{a.output.x}} units",
            "number": 7,
            "nested": { "inner": "{{a.output.x}}" },
            "flag": true,
        });

        let resolved = resolve_config(&config, &context).unwrap();
        assert_eq!(resolved["plain"], json!("just a string"));
        // No partial in-string interpolation.
        assert_eq!(resolved["partial"], json!("value is {{a.output.x}} units"));
        assert_eq!(resolved["number"], json!(7));
        // Only top-level entries are inspected, matching the config shape.
        assert_eq!(resolved["nested"], json!({ "inner": "{{a.output.x}}" }));
        assert_eq!(resolved["flag"], json!(true));
    }

    #[test]
    fn whole_value_replacement_keeps_types() {
        let context = context_with("cond", json!({ "result": true }));
        let config = json!({ "gate": "{{cond.output.result}}" });
        let resolved = resolve_config(&config, &context).unwrap();
        assert_eq!(resolved["gate"], json!(true));
    }

    #[test]
    fn segment_parser_shapes() {
        assert_eq!(
            parse_segments("a.b[2].c").unwrap(),
            vec![
                Segment::Field("a".to_string()),
                Segment::Field("b".to_string()),
                Segment::Index(2),
                Segment::Field("c".to_string()),
            ]
        );
        assert_eq!(
            parse_segments("nodes['n-0'].output").unwrap(),
            vec![
                Segment::Field("nodes".to_string()),
                Segment::Field("n-0".to_string()),
                Segment::Field("output".to_string()),
            ]
        );
        assert!(parse_segments("a[not-a-number]").is_none());
        assert!(parse_segments("").is_none());
    }
}

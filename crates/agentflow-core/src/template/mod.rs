//! Prompt templates with `{{name}}` placeholders.
//!
//! Supported token forms (whitespace around every field is ignored):
//!
//! - `{{ name }}`
//! - `{{ name : description }}`
//! - `{{ name : : default }}`
//! - `{{ name : description : default }}`
//!
//! Anything else (`{name}`, unbalanced braces) is plain text. Tokens without
//! a value are left verbatim by [`fill`]; use [`missing_inputs`] first when
//! strict validation is needed.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("template token regex"));

/// A placeholder declared by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// Value substituted for a placeholder. Lists are joined with `", "`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Text(String),
    List(Vec<String>),
}

impl InputValue {
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join(", "),
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for InputValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Parse the inside of a `{{ … }}` token. Returns `None` for an empty name.
fn parse_token(inner: &str) -> Option<PromptInput> {
    let mut parts = inner.splitn(3, ':');
    let name = parts.next().unwrap_or("").trim();
    if name.is_empty() {
        return None;
    }
    let non_empty = |s: Option<&str>| {
        s.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(PromptInput {
        name: name.to_string(),
        description: non_empty(parts.next()),
        default_value: non_empty(parts.next()),
    })
}

/// Inputs declared by `template`, in document order, first occurrence wins.
pub fn extract_inputs(template: &str) -> Vec<PromptInput> {
    let mut seen = HashSet::new();
    TOKEN_RE
        .captures_iter(template)
        .filter_map(|caps| parse_token(&caps[1]))
        .filter(|input| seen.insert(input.name.clone()))
        .collect()
}

/// Replace every token whose name has a value. Unknown tokens stay verbatim.
pub fn fill(template: &str, values: &HashMap<String, InputValue>) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &Captures| {
            parse_token(&caps[1])
                .and_then(|input| values.get(&input.name))
                .map(InputValue::render)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Inputs present in the template but absent from `values`. An empty string
/// counts as provided.
pub fn missing_inputs(template: &str, values: &HashMap<String, InputValue>) -> Vec<PromptInput> {
    extract_inputs(template)
        .into_iter()
        .filter(|input| !values.contains_key(&input.name))
        .collect()
}

/// Fill `template`, falling back to each input's declared default. Inputs
/// with neither a value nor a default are reported as a bad request.
pub fn fill_with_defaults(
    template: &str,
    values: &HashMap<String, InputValue>,
) -> Result<String, CoreError> {
    let mut merged = values.clone();
    let mut unresolved = Vec::new();
    for input in missing_inputs(template, values) {
        match input.default_value {
            Some(default) => {
                merged.insert(input.name, InputValue::Text(default));
            }
            None => unresolved.push(input.name),
        }
    }

    if !unresolved.is_empty() {
        return Err(CoreError::BadRequest(format!(
            "Missing required inputs: {}",
            unresolved.join(", ")
        )));
    }

    Ok(fill(template, &merged))
}

/// Values exposing prior step outputs as `output.1`, `output.2`, …
pub fn output_values(outputs: &[String]) -> HashMap<String, InputValue> {
    outputs
        .iter()
        .enumerate()
        .map(|(i, output)| (format!("output.{}", i + 1), InputValue::Text(output.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, InputValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), InputValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_extract_all_token_forms() {
        let inputs = extract_inputs(
            "{{ a }} {{b: the b}} {{ c : : fallback }} {{d:desc:dflt}} {{a:again}}",
        );
        assert_eq!(
            inputs,
            vec![
                PromptInput { name: "a".into(), description: None, default_value: None },
                PromptInput { name: "b".into(), description: Some("the b".into()), default_value: None },
                PromptInput { name: "c".into(), description: None, default_value: Some("fallback".into()) },
                PromptInput {
                    name: "d".into(),
                    description: Some("desc".into()),
                    default_value: Some("dflt".into()),
                },
            ]
        );
    }

    #[test]
    fn test_extract_never_duplicates() {
        let inputs = extract_inputs("{{x}} {{ x }} {{x:desc}} {{x::d}}");
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "x");
    }

    #[test]
    fn test_malformed_tokens_pass_through() {
        let template = "{name} {{ }} {{open and }}close}";
        assert!(extract_inputs("{name} {{ }}").is_empty());
        assert_eq!(fill(template, &values(&[("name", "X")])), template);
    }

    #[test]
    fn test_fill_replaces_every_form() {
        let template = "Hi {{name}}, {{ name : who }} and {{name::nobody}}!";
        assert_eq!(
            fill(template, &values(&[("name", "Alice")])),
            "Hi Alice, Alice and Alice!"
        );
    }

    #[test]
    fn test_fill_leaves_unknown_tokens() {
        assert_eq!(
            fill("{{known}} {{unknown:desc}}", &values(&[("known", "k")])),
            "k {{unknown:desc}}"
        );
    }

    #[test]
    fn test_fill_joins_lists() {
        let mut vals = HashMap::new();
        vals.insert(
            "langs".to_string(),
            InputValue::from(vec!["rust".to_string(), "go".to_string()]),
        );
        assert_eq!(fill("Use {{langs}}", &vals), "Use rust, go");
    }

    #[test]
    fn test_filled_output_has_no_inputs_left() {
        let template = "{{a}} then {{b:desc}} then {{c::x}}";
        let filled = fill(template, &values(&[("a", "1"), ("b", "2"), ("c", "3")]));
        assert_eq!(filled, "1 then 2 then 3");
        assert!(extract_inputs(&filled).is_empty());
    }

    #[test]
    fn test_missing_inputs_treats_empty_as_present() {
        let missing = missing_inputs("{{a}} {{b}}", &values(&[("a", "")]));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "b");
    }

    #[test]
    fn test_fill_with_defaults() {
        let filled = fill_with_defaults("{{city::Paris}} in {{month}}", &values(&[("month", "May")]))
            .unwrap();
        assert_eq!(filled, "Paris in May");

        let err = fill_with_defaults("{{a}} {{b}}", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_output_chaining_values() {
        let outputs = vec!["first".to_string(), "second".to_string()];
        let vals = output_values(&outputs);
        assert_eq!(fill("{{output.2}} <- {{output.1}}", &vals), "second <- first");
        assert_eq!(fill("{{output.1}}", &output_values(&["X".to_string()])), "X");
    }
}

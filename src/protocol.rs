use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::invocation::Invocation;

/// One action request sent to the worker. The wire shape is positional-only:
/// keyword argument values are appended after the positionals in the order
/// they were written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRequest {
    pub skill_name: String,
    pub args: Vec<Value>,
}

impl SkillRequest {
    pub fn from_invocation(invocation: Invocation) -> Self {
        let Invocation {
            name,
            mut args,
            kwargs,
        } = invocation;
        args.extend(kwargs.into_iter().map(|(_, value)| value));
        Self {
            skill_name: name,
            args,
        }
    }
}

/// The worker's reported state. `skill_invocation_results` is null exactly
/// on the unsolicited startup message and populated after every completed
/// invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    pub env_state: Map<String, Value>,
    #[serde(default)]
    pub skill_invocation_results: Option<String>,
}

impl WorldState {
    /// Stable multi-line rendering: objects indented four spaces, sequences
    /// kept on one line so coordinate triples and inventories stay readable.
    pub fn readable_string(&self) -> String {
        let mut root = Map::new();
        root.insert(
            "envState".to_string(),
            Value::Object(self.env_state.clone()),
        );
        root.insert(
            "skillInvocationResults".to_string(),
            match &self.skill_invocation_results {
                Some(text) => Value::String(text.clone()),
                None => Value::Null,
            },
        );
        let mut out = String::new();
        write_readable(&mut out, &Value::Object(root), 0);
        out
    }
}

fn write_readable(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            out.push_str("{\n");
            let last = map.len() - 1;
            for (index, (key, entry)) in map.iter().enumerate() {
                push_indent(out, depth + 1);
                out.push_str(&compact_json(&Value::String(key.clone())));
                out.push_str(": ");
                write_readable(out, entry, depth + 1);
                if index != last {
                    out.push(',');
                }
                out.push('\n');
            }
            push_indent(out, depth);
            out.push('}');
        }
        other => out.push_str(&compact_json(other)),
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth * 4 {
        out.push(' ');
    }
}

fn compact_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation;
    use serde_json::json;

    #[test]
    fn request_serializes_with_camel_case_field_names() {
        let request = SkillRequest {
            skill_name: "mineBlocks".to_string(),
            args: vec![json!("stone"), json!(3)],
        };
        let encoded = serde_json::to_string(&request).expect("encode");
        assert_eq!(encoded, r#"{"skillName":"mineBlocks","args":["stone",3]}"#);
    }

    #[test]
    fn keyword_values_are_appended_after_positionals() {
        let invocation = invocation::parse("craftItems('torch', count=4)").expect("parse");
        let request = SkillRequest::from_invocation(invocation);
        assert_eq!(request.skill_name, "craftItems");
        assert_eq!(request.args, vec![json!("torch"), json!(4)]);
    }

    #[test]
    fn startup_state_decodes_with_null_results() {
        let state: WorldState =
            serde_json::from_str(r#"{"envState": {"x": 1}, "skillInvocationResults": null}"#)
                .expect("decode");
        assert_eq!(state.env_state.get("x"), Some(&json!(1)));
        assert_eq!(state.skill_invocation_results, None);
    }

    #[test]
    fn reply_state_decodes_with_result_text() {
        let state: WorldState =
            serde_json::from_str(r#"{"envState": {"x": 2}, "skillInvocationResults": "ok"}"#)
                .expect("decode");
        assert_eq!(state.env_state.get("x"), Some(&json!(2)));
        assert_eq!(state.skill_invocation_results.as_deref(), Some("ok"));
    }

    #[test]
    fn non_object_env_state_is_rejected() {
        let decoded = serde_json::from_str::<WorldState>(
            r#"{"envState": [1, 2], "skillInvocationResults": null}"#,
        );
        assert!(decoded.is_err());
    }

    #[test]
    fn readable_rendering_keeps_sequences_on_one_line() {
        let state: WorldState = serde_json::from_str(
            r#"{"envState": {"position": [102, 64, -77], "health": 20}, "skillInvocationResults": null}"#,
        )
        .expect("decode");
        let rendered = state.readable_string();
        assert!(rendered.contains("\"position\": [102,64,-77]"));
        assert!(rendered.contains("\"skillInvocationResults\": null"));
        // Objects span multiple indented lines.
        assert!(rendered.starts_with("{\n"));
        assert!(rendered.ends_with('}'));
    }

    #[test]
    fn nested_objects_indent_by_four_spaces() {
        let state: WorldState = serde_json::from_str(
            r#"{"envState": {"inventory": {"stone": 12}}, "skillInvocationResults": "ok"}"#,
        )
        .expect("decode");
        let rendered = state.readable_string();
        assert!(rendered.contains("    \"envState\": {\n"));
        assert!(rendered.contains("        \"inventory\": {\n"));
        assert!(rendered.contains("            \"stone\": 12\n"));
    }
}

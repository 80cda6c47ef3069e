//! Detecting a model stuck repeating the same tool-call sequence.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::llm::ToolCall;

/// A deterministic fingerprint of one tool call, suitable for spotting
/// repeats across rounds.
#[must_use]
pub fn tool_call_signature(call: &ToolCall) -> String {
    let mut hasher = DefaultHasher::new();
    call.arguments.to_string().hash(&mut hasher);
    format!("{}:{:x}", call.name, hasher.finish())
}

/// Flags a loop over the trailing `window_size` signatures two ways: the
/// same (tool, args) tuple appearing 3 times in a row within that window, or
/// the last two windows (`2 * window_size` signatures total) being
/// identical. Returns `None` until there's at least `window_size` history.
#[must_use]
pub fn detect_loop(signatures: &[String], window_size: usize) -> Option<String> {
    if signatures.len() < window_size || window_size < 2 {
        return None;
    }
    let window = &signatures[signatures.len() - window_size..];

    if let Some(triple) = window.windows(3).find(|w| w[0] == w[1] && w[1] == w[2]) {
        let name = triple[0].split(':').next().unwrap_or(&triple[0]);
        return Some(format!("detected the same tool call repeated 3 times in a row: {name}"));
    }

    if signatures.len() >= 2 * window_size {
        let total = signatures.len();
        let previous = &signatures[total - 2 * window_size..total - window_size];
        let current = &signatures[total - window_size..];
        if previous == current {
            let names: Vec<&str> = current.iter().map(|sig| sig.split(':').next().unwrap_or(sig)).collect();
            return Some(format!(
                "detected a repeating tool-call pattern [{}] across the last two windows",
                names.join(", ")
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "id".into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[test]
    fn signature_deterministic() {
        let call = make_call("grep", json!({"pattern": "foo"}));
        assert_eq!(tool_call_signature(&call), tool_call_signature(&call));
    }

    #[test]
    fn signature_differs_for_different_args() {
        let a = make_call("grep", json!({"pattern": "foo"}));
        let b = make_call("grep", json!({"pattern": "bar"}));
        assert_ne!(tool_call_signature(&a), tool_call_signature(&b));
    }

    #[test]
    fn signature_differs_for_different_names() {
        let a = make_call("grep", json!({"pattern": "foo"}));
        let b = make_call("glob", json!({"pattern": "foo"}));
        assert_ne!(tool_call_signature(&a), tool_call_signature(&b));
    }

    #[test]
    fn detect_loop_empty() {
        assert_eq!(detect_loop(&[], 4), None);
    }

    #[test]
    fn detect_loop_below_window() {
        let sigs = vec!["a".to_string(), "a".to_string()];
        assert_eq!(detect_loop(&sigs, 4), None);
    }

    #[test]
    fn detect_loop_pattern_1() {
        let sigs = vec!["a".to_string(); 4];
        assert!(detect_loop(&sigs, 4).is_some());
    }

    #[test]
    fn detect_loop_alternating_pair_without_two_full_windows_is_not_flagged() {
        let sigs = vec!["a".to_string(), "b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(detect_loop(&sigs, 4), None);
    }

    #[test]
    fn detect_loop_last_two_windows_identical() {
        let sigs: Vec<String> = ["a", "b", "c", "a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert!(detect_loop(&sigs, 3).is_some());
    }

    #[test]
    fn detect_loop_three_in_a_row_buried_in_a_varied_window() {
        let sigs: Vec<String> = ["x", "a", "a", "a", "y", "z", "w", "v", "u", "t"].iter().map(|s| s.to_string()).collect();
        assert!(detect_loop(&sigs, 10).is_some());
    }

    #[test]
    fn no_false_positive_varied_calls() {
        let sigs: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(detect_loop(&sigs, 4), None);
    }

    #[test]
    fn no_false_positive_almost_pattern() {
        let sigs: Vec<String> = ["a", "b", "a", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(detect_loop(&sigs, 4), None);
    }

    #[test]
    fn window_larger_than_signatures_returns_none() {
        let sigs = vec!["a".to_string(); 3];
        assert_eq!(detect_loop(&sigs, 10), None);
    }

    #[test]
    fn window_size_one_returns_none() {
        let sigs = vec!["a".to_string(); 5];
        assert_eq!(detect_loop(&sigs, 1), None);
    }
}

//! Bounding the size of tool output that gets fed back to the model.
//!
//! Truncation runs in two passes: a character budget first, then (for
//! tools where it matters) a line budget on what remains.

use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Keep a window at the start and a window at the end, dropping the
    /// middle.
    HeadTail,
    /// Keep only the end.
    Tail,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolTruncationPolicy {
    pub max_chars: usize,
    pub mode: TruncationMode,
    pub max_lines: Option<usize>,
}

pub static DEFAULT_POLICIES: LazyLock<HashMap<&'static str, ToolTruncationPolicy>> =
    LazyLock::new(|| {
        let mut m = HashMap::new();
        m.insert(
            "read_file",
            ToolTruncationPolicy { max_chars: 50_000, mode: TruncationMode::HeadTail, max_lines: None },
        );
        m.insert(
            "shell",
            ToolTruncationPolicy { max_chars: 30_000, mode: TruncationMode::HeadTail, max_lines: Some(256) },
        );
        m.insert(
            "grep",
            ToolTruncationPolicy { max_chars: 20_000, mode: TruncationMode::Tail, max_lines: Some(200) },
        );
        m.insert(
            "glob",
            ToolTruncationPolicy { max_chars: 20_000, mode: TruncationMode::Tail, max_lines: Some(500) },
        );
        m.insert(
            "edit_file",
            ToolTruncationPolicy { max_chars: 10_000, mode: TruncationMode::Tail, max_lines: None },
        );
        m.insert(
            "apply_patch",
            ToolTruncationPolicy { max_chars: 10_000, mode: TruncationMode::Tail, max_lines: None },
        );
        m.insert(
            "write_file",
            ToolTruncationPolicy { max_chars: 1_000, mode: TruncationMode::Tail, max_lines: None },
        );
        m.insert(
            "spawn_agent",
            ToolTruncationPolicy { max_chars: 20_000, mode: TruncationMode::HeadTail, max_lines: None },
        );
        m.insert(
            "read_many_files",
            ToolTruncationPolicy { max_chars: 50_000, mode: TruncationMode::HeadTail, max_lines: None },
        );
        m.insert(
            "web_fetch",
            ToolTruncationPolicy { max_chars: 50_000, mode: TruncationMode::HeadTail, max_lines: None },
        );
        m.insert(
            "list_dir",
            ToolTruncationPolicy { max_chars: 30_000, mode: TruncationMode::Tail, max_lines: None },
        );
        m.insert(
            "web_search",
            ToolTruncationPolicy { max_chars: 30_000, mode: TruncationMode::Tail, max_lines: None },
        );
        m
    });

pub static FALLBACK_POLICY: ToolTruncationPolicy = ToolTruncationPolicy {
    max_chars: 30_000,
    mode: TruncationMode::HeadTail,
    max_lines: None,
};

/// Per-session overrides layered on top of [`DEFAULT_POLICIES`].
#[derive(Debug, Clone, Default)]
pub struct TruncationConfig {
    pub tool_output_limits: HashMap<String, usize>,
    pub tool_line_limits: HashMap<String, usize>,
}

/// Truncate by character count.
#[must_use]
pub fn truncate_output(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let char_count = output.chars().count();
    if char_count <= max_chars {
        return output.to_string();
    }
    let chars: Vec<char> = output.chars().collect();
    let removed = char_count - max_chars;
    match mode {
        TruncationMode::Tail => {
            let tail: String = chars[char_count - max_chars..].iter().collect();
            format!(
                "[WARNING: output truncated. First {removed} characters were removed. Showing the last {max_chars} characters.]\n{tail}"
            )
        }
        TruncationMode::HeadTail => {
            let head_half = max_chars / 2;
            let tail_half = max_chars - head_half;
            let head: String = chars[..head_half].iter().collect();
            let tail: String = chars[char_count - tail_half..].iter().collect();
            format!(
                "{head}\n[WARNING: output truncated. {removed} characters were removed from the middle.]\n{tail}"
            )
        }
    }
}

/// Truncate by line count, independent of the character pass.
#[must_use]
pub fn truncate_lines(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= max_lines {
        return output.to_string();
    }
    let head_count = max_lines / 2;
    let tail_count = max_lines - head_count;
    let omitted = lines.len() - max_lines;
    let head = lines[..head_count].join("\n");
    let tail = lines[lines.len() - tail_count..].join("\n");
    format!("{head}\n[... {omitted} lines omitted ...]\n{tail}")
}

/// Run the full char-then-line pipeline for a named tool, honoring
/// per-session overrides before falling back to the default policy table.
#[must_use]
pub fn truncate_tool_output(output: &str, tool_name: &str, config: &TruncationConfig) -> String {
    let policy = DEFAULT_POLICIES.get(tool_name).copied().unwrap_or(FALLBACK_POLICY);
    let max_chars = config
        .tool_output_limits
        .get(tool_name)
        .copied()
        .unwrap_or(policy.max_chars);
    let mut result = truncate_output(output, max_chars, policy.mode);

    let max_lines = config
        .tool_line_limits
        .get(tool_name)
        .copied()
        .or(policy.max_lines);
    if let Some(max_lines) = max_lines {
        result = truncate_lines(&result, max_lines);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_unchanged() {
        assert_eq!(truncate_output("hello", 100, TruncationMode::Tail), "hello");
    }

    #[test]
    fn tail_mode_keeps_the_end() {
        let out = "a".repeat(10) + "BOUNDARY" + &"b".repeat(10);
        let truncated = truncate_output(&out, 12, TruncationMode::Tail);
        assert!(truncated.ends_with(&"b".repeat(10)));
        assert!(truncated.contains("WARNING"));
    }

    #[test]
    fn head_tail_mode_keeps_both_ends() {
        let out = "h".repeat(20) + &"m".repeat(100) + &"t".repeat(20);
        let truncated = truncate_output(&out, 40, TruncationMode::HeadTail);
        assert!(truncated.starts_with(&"h".repeat(20)));
        assert!(truncated.ends_with(&"t".repeat(20)));
        assert!(!truncated.contains(&"m".repeat(50)));
    }

    #[test]
    fn line_truncation_keeps_head_and_tail() {
        let lines: Vec<String> = (0..20).map(|i| format!("line{i}")).collect();
        let out = lines.join("\n");
        let truncated = truncate_lines(&out, 4);
        assert!(truncated.contains("line0"));
        assert!(truncated.contains("line19"));
        assert!(truncated.contains("omitted"));
    }

    #[test]
    fn pipeline_applies_char_then_line_limits() {
        let config = TruncationConfig::default();
        let out = (0..1000).map(|i| format!("row-{i}\n")).collect::<String>();
        let truncated = truncate_tool_output(&out, "grep", &config);
        assert!(truncated.len() <= 20_100);
    }

    #[test]
    fn session_override_wins_over_policy_default() {
        let mut config = TruncationConfig::default();
        config.tool_output_limits.insert("grep".into(), 10);
        let truncated = truncate_tool_output(&"x".repeat(1000), "grep", &config);
        assert!(truncated.chars().count() < 1000);
    }

    #[test]
    fn unknown_tool_uses_fallback_policy() {
        let config = TruncationConfig::default();
        let out = "z".repeat(100);
        let truncated = truncate_tool_output(&out, "some_unlisted_tool", &config);
        assert_eq!(truncated, out);
    }

    #[test]
    fn read_many_files_and_web_fetch_use_head_tail_at_50k() {
        assert_eq!(DEFAULT_POLICIES["read_many_files"].max_chars, 50_000);
        assert_eq!(DEFAULT_POLICIES["read_many_files"].mode, TruncationMode::HeadTail);
        assert_eq!(DEFAULT_POLICIES["web_fetch"].max_chars, 50_000);
        assert_eq!(DEFAULT_POLICIES["web_fetch"].mode, TruncationMode::HeadTail);
    }

    #[test]
    fn list_dir_and_web_search_use_tail_mode() {
        assert_eq!(DEFAULT_POLICIES["list_dir"].mode, TruncationMode::Tail);
        assert_eq!(DEFAULT_POLICIES["web_search"].mode, TruncationMode::Tail);

        let out = (0..1000).map(|i| format!("entry-{i}\n")).collect::<String>();
        let truncated = truncate_tool_output(&out, "list_dir", &TruncationConfig::default());
        assert!(truncated.ends_with("entry-999\n") || truncated.contains("entry-999"));
    }
}

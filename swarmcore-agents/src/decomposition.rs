//! # Decomposition
//!
//! The Coordinator's four-call decomposition pipeline: tagged response
//! shapes for each LLM call, and the permissive JSON-recovery parser that
//! stands between free-form LLM text and those shapes. Grounded in the
//! original framework's `enhanced_queen_agent.py` prompt templates, which
//! request this same four-way JSON breakdown.

use serde::{Deserialize, Serialize};
use swarmcore_shared::SwarmError;

/// Output of the "how complex is this" call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityReport {
    pub complexity_level: String,
    #[serde(default)]
    pub estimated_minutes: u64,
    #[serde(default)]
    pub resource_needs: Vec<String>,
}

/// One explicit dependency edge: `task` depends on every id in `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRule {
    pub task: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Output of the "how do these steps relate" call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyReport {
    #[serde(default)]
    pub sequential_steps: Vec<String>,
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub rules: Vec<DependencyRule>,
}

/// Output of the "what skills does this need" call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsReport {
    #[serde(default)]
    pub primary_skills: Vec<String>,
    #[serde(default)]
    pub tools_required: Vec<String>,
}

/// Output of the subtask-generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtaskList {
    pub subtasks: Vec<String>,
}

/// Parse `raw` (direct LLM output) as `T`, falling back through the
/// permissive recovery stages in order:
/// 1. strip Markdown code fences and try direct JSON parse;
/// 2. scan for the first balanced JSON object/array substring and parse
///    that;
/// 3. (only meaningful for [`SubtaskList`]-shaped callers) split on lines
///    and strip ordinal prefixes ("1.", "- ", "* ") to build a bare list.
///
/// Returns `ParseFailure` only once every stage has failed.
pub fn parse_permissive<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, SwarmError> {
    let stripped = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str::<T>(stripped.trim()) {
        return Ok(value);
    }

    if let Some(candidate) = first_balanced_json(stripped) {
        if let Ok(value) = serde_json::from_str::<T>(&candidate) {
            return Ok(value);
        }
    }

    Err(SwarmError::parse_failure(format!(
        "could not extract structured JSON from LLM output (first 80 chars: {:.80})",
        raw
    )))
}

/// Recovery path specific to [`SubtaskList`]: when no JSON form parses at
/// all, fall back to splitting raw text into ordinal-prefixed lines. This
/// stage only counts as recovery when at least one line actually carries a
/// recognizable ordinal/bullet marker — unmarked prose is not an enumerated
/// subtask list, and an empty result here signals the caller to treat the
/// whole call as an unrecoverable `ParseFailure` and fall back to the
/// original task (`spec.md` §4.5).
pub fn parse_subtask_list_permissive(raw: &str) -> SubtaskList {
    if let Ok(list) = parse_permissive::<SubtaskList>(raw) {
        return list;
    }
    if let Some(array) = first_balanced_json(&strip_code_fences(raw)) {
        if let Ok(subtasks) = serde_json::from_str::<Vec<String>>(&array) {
            return SubtaskList { subtasks };
        }
    }

    let stripped: Vec<(bool, &str)> = raw.lines().map(strip_ordinal_prefix).collect();
    if !stripped.iter().any(|(marked, _)| *marked) {
        return SubtaskList { subtasks: Vec::new() };
    }

    let subtasks: Vec<String> = stripped
        .into_iter()
        .map(|(_, line)| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    SubtaskList { subtasks }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches("json").trim_start_matches("JSON");
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

/// Scan `text` for the first balanced `{...}` or `[...]` substring,
/// respecting string literals so braces inside quoted strings don't
/// confuse the balance count.
fn first_balanced_json(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{' || *b == b'[')?;
    let opening = bytes[start];
    let closing = if opening == b'{' { b'}' } else { b']' };

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == opening => depth += 1,
            b if b == closing => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip a leading ordinal ("1.") or bullet ("- "/"* ") marker from `line`,
/// reporting whether one was actually found.
fn strip_ordinal_prefix(line: &str) -> (bool, &str) {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
        return (true, rest);
    }

    if let Some(dot) = trimmed.find('.') {
        let (prefix, rest) = trimmed.split_at(dot);
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
            return (true, rest.trim_start_matches('.').trim_start());
        }
    }
    (false, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_json() {
        let raw = r#"{"complexity_level": "high", "estimated_minutes": 45, "resource_needs": ["gpu"]}"#;
        let report: ComplexityReport = parse_permissive(raw).unwrap();
        assert_eq!(report.complexity_level, "high");
        assert_eq!(report.estimated_minutes, 45);
    }

    #[test]
    fn strips_markdown_fences_before_parsing() {
        let raw = "```json\n{\"complexity_level\": \"low\"}\n```";
        let report: ComplexityReport = parse_permissive(raw).unwrap();
        assert_eq!(report.complexity_level, "low");
    }

    #[test]
    fn finds_balanced_json_embedded_in_prose() {
        let raw = "Sure, here is the analysis: {\"subtasks\": [\"step one\", \"step two\"]} hope that helps!";
        let report: SubtaskList = parse_permissive(raw).unwrap();
        assert_eq!(report.subtasks, vec!["step one", "step two"]);
    }

    #[test]
    fn falls_back_to_ordinal_line_split_for_subtask_lists() {
        let raw = "1. Set up the project\n2. Write the scraper\n3. Add tests";
        let list = parse_subtask_list_permissive(raw);
        assert_eq!(list.subtasks, vec!["Set up the project", "Write the scraper", "Add tests"]);
    }

    #[test]
    fn strips_bullet_prefixes_too() {
        let raw = "- do the first thing\n* do the second thing";
        let list = parse_subtask_list_permissive(raw);
        assert_eq!(list.subtasks, vec!["do the first thing", "do the second thing"]);
    }

    #[test]
    fn unmarked_prose_is_not_recovered_as_a_subtask_list() {
        let raw = "not json and no list markers either";
        let list = parse_subtask_list_permissive(raw);
        assert!(list.subtasks.is_empty(), "prose with no ordinal/bullet marker must not be treated as a recovered list");
    }

    #[test]
    fn balanced_json_scan_ignores_braces_inside_strings() {
        let raw = r#"{"subtasks": ["contains a { brace }"]}"#;
        let extracted = first_balanced_json(raw).unwrap();
        assert_eq!(extracted, raw);
    }
}

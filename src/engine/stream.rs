//! Classification of engine stream-JSON output.
//!
//! Engines emit one JSON record per line in streaming mode. Only
//! lines whose first non-whitespace character is `{` are parsed;
//! everything else is banner/noise and ignored. Three things are
//! extracted: token accounting from the last `result` record, the
//! first `error` record, and a human-readable step label derived from
//! tool invocations.

use serde_json::Value;

/// Accumulated outcome of a streamed engine run.
///
/// Feed every line; token accounting keeps the *last* `result`
/// record, error detection keeps the *first* `error` record.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub response: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub error: Option<String>,
}

impl StreamOutcome {
    pub fn feed(&mut self, line: &str) {
        let Some(value) = parse_record(line) else {
            return;
        };

        match value.get("type").and_then(Value::as_str) {
            Some("result") => {
                self.response = Some(
                    value
                        .get("result")
                        .and_then(Value::as_str)
                        .unwrap_or("Task completed")
                        .to_string(),
                );
                self.input_tokens = value
                    .pointer("/usage/input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                self.output_tokens = value
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                self.cost = value
                    .get("total_cost_usd")
                    .or_else(|| value.get("cost_usd"))
                    .and_then(Value::as_f64);
            }
            Some("error") => {
                if self.error.is_none() {
                    self.error = Some(
                        value
                            .pointer("/error/message")
                            .and_then(Value::as_str)
                            .or_else(|| value.get("message").and_then(Value::as_str))
                            .unwrap_or("Unknown error")
                            .to_string(),
                    );
                }
            }
            _ => {}
        }
    }

    /// Parse a whole captured transcript (blocking execution path).
    pub fn from_transcript(transcript: &str) -> Self {
        let mut outcome = Self::default();
        for line in transcript.lines() {
            outcome.feed(line);
        }
        outcome
    }
}

/// Derive a step label from one streamed line, or `None` when the
/// line carries no step information. Deterministic: the same line
/// always yields the same label.
pub fn detect_step(line: &str) -> Option<&'static str> {
    let value = parse_record(line)?;
    let fields = ToolFields::extract(&value);
    fields.classify()
}

fn parse_record(line: &str) -> Option<Value> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Lower-cased tool-invocation fields pulled out of a record, either
/// from its top level or from nested `tool_use` content blocks.
#[derive(Debug, Default)]
struct ToolFields {
    tool: String,
    command: String,
    file_path: String,
    description: String,
}

impl ToolFields {
    fn extract(value: &Value) -> Self {
        let mut fields = Self::from_object(value);
        if fields.is_empty() {
            if let Some(blocks) = value.pointer("/message/content").and_then(Value::as_array) {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        fields.merge(Self::from_tool_use(block));
                    }
                }
            }
        }
        fields
    }

    fn from_object(value: &Value) -> Self {
        Self {
            tool: string_field(value, &["tool", "name", "tool_name"]),
            command: string_field(value, &["command"]),
            file_path: string_field(value, &["file_path", "filePath", "path"]),
            description: string_field(value, &["description"]),
        }
    }

    fn from_tool_use(block: &Value) -> Self {
        let mut fields = Self {
            tool: string_field(block, &["name"]),
            ..Self::default()
        };
        if let Some(input) = block.get("input") {
            fields.command = string_field(input, &["command"]);
            fields.file_path = string_field(input, &["file_path", "filePath", "path"]);
            fields.description = string_field(input, &["description"]);
        }
        fields
    }

    fn merge(&mut self, other: Self) {
        if self.tool.is_empty() {
            self.tool = other.tool;
        }
        if self.command.is_empty() {
            self.command = other.command;
        }
        if self.file_path.is_empty() {
            self.file_path = other.file_path;
        }
        if self.description.is_empty() {
            self.description = other.description;
        }
    }

    fn is_empty(&self) -> bool {
        self.tool.is_empty()
            && self.command.is_empty()
            && self.file_path.is_empty()
            && self.description.is_empty()
    }

    /// Ordered classification rules; the first match wins. Reads come
    /// before the test-file check so a *read* of a test file is not
    /// misclassified as test authoring.
    fn classify(&self) -> Option<&'static str> {
        const LINTERS: [&str; 4] = ["lint", "eslint", "biome", "prettier"];
        const TEST_RUNNERS: [&str; 6] =
            ["vitest", "jest", "bun test", "npm test", "pytest", "go test"];
        const TEST_FILE_MARKERS: [&str; 4] = [".test.", ".spec.", "__tests__", "_test.go"];

        if matches!(self.tool.as_str(), "read" | "glob" | "grep") {
            return Some("Reading code");
        }
        if self.command.contains("git commit") || self.description.contains("git commit") {
            return Some("Committing");
        }
        if self.command.contains("git add") || self.description.contains("git add") {
            return Some("Staging");
        }
        if LINTERS.iter().any(|l| self.command.contains(l)) {
            return Some("Linting");
        }
        if TEST_RUNNERS.iter().any(|t| self.command.contains(t)) {
            return Some("Testing");
        }
        if matches!(self.tool.as_str(), "write" | "edit") {
            if TEST_FILE_MARKERS.iter().any(|m| self.file_path.contains(m)) {
                return Some("Writing tests");
            }
            return Some("Implementing");
        }
        None
    }
}

fn string_field(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_lines_are_ignored() {
        assert_eq!(detect_step("plain text output"), None);
        assert_eq!(detect_step("  [banner] starting"), None);
        assert_eq!(detect_step("{not valid json"), None);
    }

    #[test]
    fn read_of_test_file_is_reading_not_writing_tests() {
        assert_eq!(
            detect_step(r#"{"tool":"Read","file_path":"src/foo.test.ts"}"#),
            Some("Reading code")
        );
    }

    #[test]
    fn write_to_test_file_is_writing_tests() {
        assert_eq!(
            detect_step(r#"{"tool":"Write","file_path":"src/foo.test.ts"}"#),
            Some("Writing tests")
        );
        assert_eq!(
            detect_step(r#"{"tool":"Edit","path":"pkg/server_test.go"}"#),
            Some("Writing tests")
        );
    }

    #[test]
    fn write_to_source_file_is_implementing() {
        assert_eq!(
            detect_step(r#"{"tool":"Write","file_path":"src/foo.ts"}"#),
            Some("Implementing")
        );
    }

    #[test]
    fn lint_command_is_linting() {
        assert_eq!(
            detect_step(r#"{"command":"bunx biome check ."}"#),
            Some("Linting")
        );
    }

    #[test]
    fn test_runner_commands_are_testing() {
        assert_eq!(
            detect_step(r#"{"command":"go test ./..."}"#),
            Some("Testing")
        );
        assert_eq!(detect_step(r#"{"command":"npm test"}"#), Some("Testing"));
    }

    #[test]
    fn git_commands_win_over_lint_and_test() {
        assert_eq!(
            detect_step(r#"{"command":"git commit -m 'run lint and jest'"}"#),
            Some("Committing")
        );
        assert_eq!(
            detect_step(r#"{"command":"git add src/lint.rs"}"#),
            Some("Staging")
        );
    }

    #[test]
    fn commit_in_description_counts() {
        assert_eq!(
            detect_step(r#"{"tool":"Bash","description":"Run git commit"}"#),
            Some("Committing")
        );
    }

    #[test]
    fn tool_name_matching_is_case_insensitive() {
        assert_eq!(
            detect_step(r#"{"tool_name":"GREP","command":""}"#),
            Some("Reading code")
        );
        assert_eq!(detect_step(r#"{"name":"Glob"}"#), Some("Reading code"));
    }

    #[test]
    fn unknown_records_yield_no_step() {
        assert_eq!(detect_step(r#"{"type":"system","subtype":"init"}"#), None);
        assert_eq!(detect_step(r#"{"tool":"WebFetch","url":"x"}"#), None);
    }

    #[test]
    fn nested_tool_use_blocks_are_classified() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Edit","input":{"file_path":"src/lib.rs"}}]}}"#;
        assert_eq!(detect_step(line), Some("Implementing"));
    }

    #[test]
    fn detect_step_is_deterministic() {
        let line = r#"{"tool":"Read","file_path":"a.rs"}"#;
        let first = detect_step(line);
        for _ in 0..10 {
            assert_eq!(detect_step(line), first);
        }
    }

    #[test]
    fn token_accounting_takes_last_result_record() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"result","result":"ok","usage":{"input_tokens":10,"output_tokens":20}}"#);
        outcome.feed(r#"{"type":"assistant","message":{"content":[]}}"#);

        assert_eq!(outcome.response.as_deref(), Some("ok"));
        assert_eq!(outcome.input_tokens, 10);
        assert_eq!(outcome.output_tokens, 20);

        outcome.feed(r#"{"type":"result","result":"final","usage":{"input_tokens":1,"output_tokens":2}}"#);
        assert_eq!(outcome.response.as_deref(), Some("final"));
        assert_eq!(outcome.input_tokens, 1);
        assert_eq!(outcome.output_tokens, 2);
    }

    #[test]
    fn result_without_text_defaults_to_task_completed() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"result","usage":{"input_tokens":5,"output_tokens":6}}"#);
        assert_eq!(outcome.response.as_deref(), Some("Task completed"));
    }

    #[test]
    fn first_error_record_wins() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"error","error":{"message":"rate limited"}}"#);
        outcome.feed(r#"{"type":"error","message":"second"}"#);
        assert_eq!(outcome.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn error_message_fallback_chain() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"error","message":"top-level"}"#);
        assert_eq!(outcome.error.as_deref(), Some("top-level"));

        let mut bare = StreamOutcome::default();
        bare.feed(r#"{"type":"error"}"#);
        assert_eq!(bare.error.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn transcript_parsing_matches_line_feeding() {
        let transcript = "noise\n{\"type\":\"result\",\"result\":\"done\",\"usage\":{\"input_tokens\":3,\"output_tokens\":4}}\n";
        let outcome = StreamOutcome::from_transcript(transcript);
        assert_eq!(outcome.response.as_deref(), Some("done"));
        assert_eq!(outcome.input_tokens, 3);
        assert_eq!(outcome.output_tokens, 4);
    }

    #[test]
    fn cost_is_captured_from_result_record() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"result","result":"ok","total_cost_usd":0.42,"usage":{"input_tokens":1,"output_tokens":1}}"#);
        assert_eq!(outcome.cost, Some(0.42));
    }
}

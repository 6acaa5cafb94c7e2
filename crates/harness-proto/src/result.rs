//! Captured output of a subject run.

use serde::{Serialize, Serializer};

/// Raw bytes drained from the subject's streams.
///
/// In `Separate` mode `stdout`/`stderr` are filled and `combined` is `None`.
/// In `Merged` mode only `combined` is filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    #[serde(serialize_with = "lossy_bytes")]
    pub stdout: Vec<u8>,
    #[serde(serialize_with = "lossy_bytes")]
    pub stderr: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "lossy_text")]
    pub combined: Option<Vec<u8>>,
}

impl CapturedOutput {
    /// True when nothing was read from any stream.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty()
            && self.stderr.is_empty()
            && self.combined.as_ref().is_none_or(Vec::is_empty)
    }
}

/// Outcome of a subject run that exited normally (any exit code).
///
/// Produced once per invocation and read-only afterward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    exit_status: i32,
    stdout: String,
    stderr: String,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "lossy_text")]
    combined: Option<Vec<u8>>,
}

fn lossy_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn lossy_text<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_some(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

impl ExecutionResult {
    /// Builds a result from an exit code and captured bytes.
    ///
    /// One trailing newline is stripped from stdout and stderr. The combined
    /// stream is kept byte-for-byte.
    pub fn from_captured(exit_status: i32, output: CapturedOutput) -> Self {
        Self {
            exit_status,
            stdout: strip_trailing_newline(&String::from_utf8_lossy(&output.stdout)).to_string(),
            stderr: strip_trailing_newline(&String::from_utf8_lossy(&output.stderr)).to_string(),
            combined: output.combined,
        }
    }

    /// The process exit code; zero means success.
    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Raw interleaved stream, if captured in merged mode.
    pub fn combined(&self) -> Option<&[u8]> {
        self.combined.as_deref()
    }

    /// Lossy UTF-8 view of the combined stream.
    pub fn combined_text(&self) -> Option<String> {
        self.combined
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Strips a single trailing `\n`, matching shell command substitution for
/// the common one-line case. Internal newlines are untouched.
pub fn strip_trailing_newline(text: &str) -> &str {
    text.strip_suffix('\n').unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_trailing_newline() {
        assert_eq!(strip_trailing_newline("abc\n"), "abc");
        assert_eq!(strip_trailing_newline("abc\nghi\n"), "abc\nghi");
        assert_eq!(strip_trailing_newline("abc\n\n"), "abc\n");
        assert_eq!(strip_trailing_newline("abc"), "abc");
        assert_eq!(strip_trailing_newline(""), "");
    }

    #[test]
    fn test_from_captured_keeps_combined_raw() {
        let output = CapturedOutput {
            stdout: Vec::new(),
            stderr: Vec::new(),
            combined: Some(b"abc\ndef\n".to_vec()),
        };
        let result = ExecutionResult::from_captured(0, output);

        assert!(result.success());
        assert_eq!(result.stdout(), "");
        assert_eq!(result.combined(), Some(&b"abc\ndef\n"[..]));
        assert_eq!(result.combined_text().as_deref(), Some("abc\ndef\n"));
    }

    #[test]
    fn test_non_zero_exit_is_a_result() {
        let output = CapturedOutput {
            stdout: b"out\n".to_vec(),
            stderr: b"err\n".to_vec(),
            combined: None,
        };
        let result = ExecutionResult::from_captured(123, output);

        assert!(!result.success());
        assert_eq!(result.exit_status(), 123);
        assert_eq!(result.stdout(), "out");
        assert_eq!(result.stderr(), "err");
    }

    #[test]
    fn test_combined_serializes_as_text() {
        let output = CapturedOutput {
            combined: Some(b"abc\ndef\n".to_vec()),
            ..CapturedOutput::default()
        };
        let json = serde_json::to_value(ExecutionResult::from_captured(0, output)).unwrap();

        assert_eq!(json["combined"], "abc\ndef\n");
        assert_eq!(json["exit_status"], 0);
    }

    #[test]
    fn test_partial_output_serializes_as_text() {
        let partial = CapturedOutput {
            stdout: b"Running 3 examples\n".to_vec(),
            stderr: vec![0xff, b'!'],
            combined: None,
        };
        let json = serde_json::to_value(&partial).unwrap();

        assert_eq!(json["stdout"], "Running 3 examples\n");
        assert_eq!(json["stderr"], "\u{fffd}!");
        assert!(json.get("combined").is_none());
        assert!(!partial.is_empty());
        assert!(CapturedOutput::default().is_empty());
    }
}

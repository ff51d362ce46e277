//! Structured JSON parsing.
//!
//! Wraps `serde_json` so that a failure reports the character range of the
//! offending input instead of a line/column pair. The engine treats any error
//! from here exactly like a schema violation.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (chars {start}..{end})")]
pub struct JsonParseError {
    /// Offset, in characters, of the first character that could not be parsed.
    pub start: usize,
    /// Offset, in characters, one past the end of the offending token.
    pub end: usize,
    pub message: String,
}

pub fn parse(text: &str) -> Result<Value, JsonParseError> {
    serde_json::from_str(text).map_err(|e| JsonParseError::locate(text, &e))
}

impl JsonParseError {
    fn locate(text: &str, err: &serde_json::Error) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut start = char_offset(text, err.line(), err.column()).min(total);
        // Literal and number errors are reported past the partial token.
        while start > 0 && is_token_char(chars[start - 1]) {
            start -= 1;
        }
        let token_len = chars[start..]
            .iter()
            .take_while(|c| is_token_char(**c))
            .count();
        let end = (start + token_len).max((start + 1).min(total));
        Self {
            start,
            end,
            message: err.to_string(),
        }
    }
}

fn is_token_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ',' | ':' | '{' | '}' | '[' | ']' | '"')
}

// serde_json reports 1-based lines and 1-based byte columns.
fn char_offset(text: &str, line: usize, column: usize) -> usize {
    let mut byte = 0;
    for (idx, chunk) in text.split_inclusive('\n').enumerate() {
        if idx + 1 == line {
            byte += column.saturating_sub(1).min(chunk.len());
            break;
        }
        byte += chunk.len();
    }
    let byte = byte.min(text.len());
    text.char_indices().take_while(|(i, _)| *i < byte).count()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_valid_json() {
        let text = serde_json::json!({
            "name": "statesync",
            "url": "https://example.com",
            "awesome": true,
            "when": 2019,
        })
        .to_string();

        let value = parse(&text).unwrap();
        assert_eq!(value["when"], 2019);
    }

    #[test]
    fn rejects_invalid_json_with_a_located_error() {
        let text = r#"{ "name": post "url": true }"#;

        let err = parse(text).unwrap_err();
        assert!(err.start < err.end);
        assert!(err.end <= text.chars().count());
        assert!(err.message.contains("expected value"));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let text = "{\"k\": \"ü\",\n \"x\": nope}";

        let err = parse(text).unwrap_err();
        let bad: String = text.chars().skip(err.start).take(err.end - err.start).collect();
        assert_eq!(bad, "nope");
    }

    #[test]
    fn truncated_literal_is_covered_by_the_span() {
        let text = r#"{"a": tru}"#;

        let err = parse(text).unwrap_err();

        assert_eq!((err.start, err.end), (6, 9));
    }

    #[test]
    fn empty_input_is_an_error_at_zero() {
        let err = parse("").unwrap_err();
        assert_eq!(err.start, 0);
        assert_eq!(err.end, 0);
    }
}

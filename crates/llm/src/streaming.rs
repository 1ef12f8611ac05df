//! Streaming transport types shared by the pipeline and transformer stages.

pub(crate) mod anthropic;

use std::pin::Pin;

use futures::Stream;

use crate::{error::LlmError, messages::unified::UnifiedChunk};

/// One item of a normalised upstream stream.
///
/// The pipeline guarantees every stream yields exactly one `Done`, as its
/// final item, synthesising one at EOF when the upstream never sent
/// `data: [DONE]`. Stages may rely on that for their flush logic.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A parsed upstream chunk.
    Chunk(UnifiedChunk),
    /// An upstream data line that failed to parse as JSON, forwarded
    /// verbatim so downstream consumers can still see it.
    Raw(String),
    /// End of stream.
    Done,
}

/// A boxed stream of normalised items.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamItem, LlmError>> + Send>>;

/// Parse a JSON document leniently.
///
/// Retries once after stripping C0/C1 control characters and escaping stray
/// backslashes and quotes, matching how upstreams occasionally mangle
/// tool-call arguments. Returns `None` when the document stays unparsable.
pub(crate) fn parse_loose_json(input: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(input) {
        return Some(value);
    }

    let cleaned = sanitize_json(input);

    match serde_json::from_str(&cleaned) {
        Ok(value) => Some(value),
        Err(error) => {
            log::warn!("Dropping unparsable JSON fragment: {error}");
            None
        }
    }
}

/// Strip C0/C1 control characters and escape backslashes and quotes that
/// appear outside of valid escape sequences.
pub(crate) fn sanitize_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            // C0 and C1 controls (Unicode Cc) are dropped outright.
            c if c.is_control() => {}
            '\\' => match chars.peek() {
                Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                    out.push('\\');
                    out.push(chars.next().expect("peeked"));
                }
                _ => out.push_str("\\\\"),
            },
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_parse_accepts_valid_json() {
        let value = parse_loose_json(r#"{"location":"Beijing"}"#).unwrap();
        assert_eq!(value["location"], "Beijing");
    }

    #[test]
    fn loose_parse_strips_control_characters() {
        let input = "{\"location\":\"Bei\u{0001}jing\"}";
        let value = parse_loose_json(input).unwrap();
        assert_eq!(value["location"], "Beijing");
    }

    #[test]
    fn loose_parse_escapes_stray_backslashes() {
        let input = r#"{"path":"C:\Users"}"#;
        let value = parse_loose_json(input).unwrap();
        assert_eq!(value["path"], r"C:\Users");
    }

    #[test]
    fn loose_parse_gives_up_on_garbage() {
        assert!(parse_loose_json("not json at all").is_none());
    }
}

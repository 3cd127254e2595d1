//! Converts a completed non-streaming response into a lazy sequence of
//! chat-completion chunks by slicing the assistant content into fixed-size
//! pieces.
//!
//! The HTTP/SSE framing around this sequence (one `data: <json>\n\n` per
//! item, the trailing `data: [DONE]\n\n`) is the server's responsibility;
//! this module only produces the logical chunk sequence.

const CHUNK_SIZE: usize = 20;

/// One streamed delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletionChunk {
    pub delta_content: String,
    pub finish_reason: Option<String>,
    pub session_id: Option<String>,
}

/// Either a chunk or a terminal error, mirroring the contract's
/// `ChatCompletionChunk | Error` union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Chunk(ChatCompletionChunk),
    Error(String),
}

/// Build the full chunk sequence for a successful completion.
///
/// Content is sliced into `CHUNK_SIZE`-character pieces, each emitted with
/// a null `finish_reason`; a final empty-delta chunk carries
/// `finish_reason="stop"` and the session id.
pub fn chunk_completion(content: &str, session_id: Option<String>) -> Vec<StreamItem> {
    let chars: Vec<char> = content.chars().collect();
    let mut items = Vec::new();

    for slice in chars.chunks(CHUNK_SIZE) {
        items.push(StreamItem::Chunk(ChatCompletionChunk {
            delta_content: slice.iter().collect(),
            finish_reason: None,
            session_id: None,
        }));
    }

    items.push(StreamItem::Chunk(ChatCompletionChunk {
        delta_content: String::new(),
        finish_reason: Some("stop".to_string()),
        session_id,
    }));

    items
}

/// Build the single-item sequence for a failed completion.
pub fn chunk_error(message: impl Into<String>) -> Vec<StreamItem> {
    vec![StreamItem::Error(message.into())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_yields_one_chunk_plus_terminator() {
        let items = chunk_completion("hello", Some("sess-1".to_string()));
        assert_eq!(items.len(), 2);
        match &items[0] {
            StreamItem::Chunk(c) => {
                assert_eq!(c.delta_content, "hello");
                assert_eq!(c.finish_reason, None);
            }
            _ => panic!("expected chunk"),
        }
        match &items[1] {
            StreamItem::Chunk(c) => {
                assert_eq!(c.delta_content, "");
                assert_eq!(c.finish_reason.as_deref(), Some("stop"));
                assert_eq!(c.session_id.as_deref(), Some("sess-1"));
            }
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn long_content_splits_into_twenty_char_pieces() {
        let content = "a".repeat(45);
        let items = chunk_completion(&content, None);
        // 45 chars -> ceil(45/20) = 3 content chunks + 1 terminator.
        assert_eq!(items.len(), 4);
        match &items[0] {
            StreamItem::Chunk(c) => assert_eq!(c.delta_content.len(), 20),
            _ => panic!("expected chunk"),
        }
        match &items[2] {
            StreamItem::Chunk(c) => assert_eq!(c.delta_content.len(), 5),
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn empty_content_still_terminates() {
        let items = chunk_completion("", None);
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], StreamItem::Chunk(c) if c.finish_reason.as_deref() == Some("stop")));
    }

    #[test]
    fn error_path_is_single_item() {
        let items = chunk_error("validation failed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], StreamItem::Error("validation failed".to_string()));
    }
}

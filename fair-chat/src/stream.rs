use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ChatError, Result},
    generation::ByteStream,
};

/// One NDJSON line of a generation response. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A fragment together with everything received so far in the turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamUpdate {
    pub fragment: String,
    pub cumulative: String,
}

#[derive(Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
    accumulated: String,
    /// Set once a chunk reports `done`.
    done: bool,
}

impl NdjsonDecoder {
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    /// `None` for blank lines.
    fn decode(&mut self, line: &[u8]) -> Option<Result<StreamUpdate>> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim_end_matches('\r'),
            Err(e) => {
                return Some(Err(ChatError::MalformedChunk {
                    line: String::from_utf8_lossy(line).into_owned(),
                    reason: e.to_string(),
                }));
            }
        };
        if text.trim().is_empty() {
            return None;
        }

        let chunk: GenerationChunk = match serde_json::from_str(text) {
            Ok(chunk) => chunk,
            Err(e) => {
                return Some(Err(ChatError::MalformedChunk {
                    line: text.to_string(),
                    reason: e.to_string(),
                }));
            }
        };

        if let Some(error) = chunk.error {
            return Some(Err(ChatError::GenerationFailed(error)));
        }

        self.done = chunk.done;
        self.accumulated.push_str(&chunk.response);
        Some(Ok(StreamUpdate {
            fragment: chunk.response,
            cumulative: self.accumulated.clone(),
        }))
    }
}

struct DecodeState {
    body: Option<ByteStream>,
    decoder: NdjsonDecoder,
    finished: bool,
}

/// Decodes a streaming generation body into incremental updates.
///
/// Yields one update per non-blank line in arrival order, including lines with an
/// empty `response`. Lines may be split across chunks; a final line without a
/// trailing newline is decoded once the body ends. The stream ends after the
/// first error or after a line marked `done`, without waiting for the body to close.
pub fn process_stream(body: ByteStream) -> impl Stream<Item = Result<StreamUpdate>> + Send {
    let state = DecodeState {
        body: Some(body),
        decoder: NdjsonDecoder::default(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(line) = state.decoder.next_line() {
                match state.decoder.decode(&line) {
                    Some(item) => {
                        state.finished = item.is_err() || state.decoder.done;
                        return Some((item, state));
                    }
                    None => continue,
                }
            }

            let Some(body) = state.body.as_mut() else {
                let rest = std::mem::take(&mut state.decoder.buffer);
                let item = state.decoder.decode(&rest)?;
                state.finished = true;
                return Some((item, state));
            };

            let next = body.next().await;
            match next {
                Some(Ok(chunk)) => state.decoder.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => state.body = None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&str]) -> ByteStream {
        let chunks: Vec<Result<Vec<u8>>> = chunks
            .iter()
            .map(|chunk| Ok(chunk.as_bytes().to_vec()))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn pairs(updates: Vec<Result<StreamUpdate>>) -> Vec<(String, String)> {
        updates
            .into_iter()
            .map(|update| {
                let update = update.unwrap();
                (update.fragment, update.cumulative)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_accumulates_fragments_in_order() {
        let updates = process_stream(body(&["{\"response\":\"Hel\"}\n{\"response\":\"lo\"}\n"]))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(
            pairs(updates),
            vec![
                ("Hel".to_string(), "Hel".to_string()),
                ("lo".to_string(), "Hello".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_body_yields_nothing() {
        assert!(process_stream(body(&[])).collect::<Vec<_>>().await.is_empty());
        assert!(process_stream(body(&["", "\n", "\r\n"])).collect::<Vec<_>>().await.is_empty());
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let updates = process_stream(body(&[
            "{\"respo",
            "nse\":\"caf\u{e9}",
            " \"}\r\n{\"response\":\"",
            "au lait\",\"done\":false}",
        ]))
        .collect::<Vec<_>>()
        .await;
        assert_eq!(
            pairs(updates),
            vec![
                ("caf\u{e9} ".to_string(), "caf\u{e9} ".to_string()),
                ("au lait".to_string(), "caf\u{e9} au lait".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_multibyte_character_split_between_chunks() {
        let text = "{\"response\":\"\u{1F916}\"}\n".as_bytes().to_vec();
        let (head, tail) = text.split_at(16);
        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(head.to_vec()), Ok(tail.to_vec())];
        let updates = process_stream(Box::pin(stream::iter(chunks)))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(pairs(updates), vec![("\u{1F916}".to_string(), "\u{1F916}".to_string())]);
    }

    #[tokio::test]
    async fn test_done_marker_with_empty_response_is_yielded() {
        let updates = process_stream(body(&[
            "{\"response\":\"Hi\"}\n{\"response\":\"\",\"done\":true,\"eval_count\":3}\n",
        ]))
        .collect::<Vec<_>>()
        .await;
        assert_eq!(
            pairs(updates),
            vec![
                ("Hi".to_string(), "Hi".to_string()),
                (String::new(), "Hi".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_reading_after_done() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"{\"response\":\"Hi\"}\n{\"response\":\"\",\"done\":true}\n".to_vec()),
            Ok(b"{\"response\":\"late\"}\n".to_vec()),
        ];
        let body: ByteStream = Box::pin(stream::iter(chunks).chain(stream::pending()));

        let updates = process_stream(body).collect::<Vec<_>>().await;
        assert_eq!(
            pairs(updates),
            vec![
                ("Hi".to_string(), "Hi".to_string()),
                (String::new(), "Hi".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_line_ends_the_stream() {
        let updates = process_stream(body(&[
            "{\"response\":\"ok\"}\nnot json\n{\"response\":\"never\"}\n",
        ]))
        .collect::<Vec<_>>()
        .await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].as_ref().unwrap().cumulative, "ok");
        match &updates[1] {
            Err(ChatError::MalformedChunk { line, .. }) => assert_eq!(line, "not json"),
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_chunk_is_surfaced() {
        let updates = process_stream(body(&["{\"error\":\"model 'x' not found\"}\n"]))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            &updates[0],
            Err(ChatError::GenerationFailed(reason)) if reason == "model 'x' not found"
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"{\"response\":\"a\"}\n".to_vec()),
            Err(ChatError::StreamRead("connection reset".to_string())),
            Ok(b"{\"response\":\"b\"}\n".to_vec()),
        ];
        let updates = process_stream(Box::pin(stream::iter(chunks)))
            .collect::<Vec<_>>()
            .await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[1], Err(ChatError::StreamRead(_))));
    }
}

// Sommaii Chat Engine — Server-Sent Events framing and event decoding
//
// Two layers:
//   • SseDecoder turns raw bytes into SseFrame values (field parsing only).
//   • decode_event turns a frame into a typed StreamEvent. It fails closed:
//     an unknown event name or a malformed message body is a Decode error
//     that the session controller logs and skips.
//
// Wire format of the question stream:
//   data: {"chat_id": "...", "text": "..."}      answer fragment
//   event: error        data: {"code", "description"} fatal
//   event: FatalError   data: ...                      fatal

use crate::atoms::constants::{SSE_ERROR_EVENT, SSE_FATAL_EVENT, SSE_MESSAGE_EVENT};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ApiErrorDetail, SseFrame};
use futures::stream::{BoxStream, Stream, StreamExt};
use log::trace;
use serde::Deserialize;
use std::collections::VecDeque;

// ── Framing ────────────────────────────────────────────────────────────

/// Incremental SSE parser. Feed it chunks as they arrive; it returns every
/// frame completed by a blank line. Lines are split on `\n` bytes, so a
/// multi-byte UTF-8 sequence split across chunks is reassembled intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    frame: SseFrame,
    has_data: bool,
    has_fields: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush at end of stream: a trailing line without newline and any
    /// frame not yet terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.frame.event = Some(value.to_string());
                self.has_fields = true;
            }
            "data" => {
                if self.has_data {
                    self.frame.data.push('\n');
                }
                self.frame.data.push_str(value);
                self.has_data = true;
                self.has_fields = true;
            }
            "id" => {
                self.frame.id = Some(value.to_string());
                self.has_fields = true;
            }
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.frame.retry = Some(ms);
                    self.has_fields = true;
                }
            }
            other => trace!("[sse] Ignoring unknown field '{}'", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if !self.has_fields {
            return None;
        }
        self.has_data = false;
        self.has_fields = false;
        Some(std::mem::take(&mut self.frame))
    }
}

/// Adapt a byte stream (e.g. `reqwest::Response::bytes_stream()`) into a
/// stream of frames. A transport error is yielded once and ends the stream.
pub fn frames<S, B, E>(bytes: S) -> BoxStream<'static, EngineResult<SseFrame>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: S,
        decoder: SseDecoder,
        ready: VecDeque<SseFrame>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.ready.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => st.ready.extend(st.decoder.push(chunk.as_ref())),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(EngineError::Stream(format!("Stream read error: {}", e))), st));
                }
                None => {
                    st.done = true;
                    st.ready.extend(st.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

// ── Event decoding ─────────────────────────────────────────────────────

/// Payload of an answer fragment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamPayload {
    pub chat_id: String,
    /// Incremental fragment; absent or empty on the liveness event.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(StreamPayload),
    Error(ApiErrorDetail),
    Fatal(ApiErrorDetail),
}

/// Decode one frame. `Ok(None)` is a keep-alive (default event, no data).
pub fn decode_event(frame: &SseFrame) -> EngineResult<Option<StreamEvent>> {
    match frame.event.as_deref().unwrap_or(SSE_MESSAGE_EVENT) {
        SSE_MESSAGE_EVENT => {
            if frame.data.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str::<StreamPayload>(&frame.data)
                .map(|payload| Some(StreamEvent::Message(payload)))
                .map_err(|e| EngineError::Decode(format!("message payload: {}", e)))
        }
        SSE_ERROR_EVENT => Ok(Some(StreamEvent::Error(error_detail(&frame.data)))),
        SSE_FATAL_EVENT => Ok(Some(StreamEvent::Fatal(error_detail(&frame.data)))),
        other => Err(EngineError::Decode(format!("unknown event '{}'", other))),
    }
}

/// Error events always terminate the stream; their body is informational,
/// so a non-JSON body becomes the description verbatim.
fn error_detail(data: &str) -> ApiErrorDetail {
    serde_json::from_str::<ApiErrorDetail>(data).unwrap_or_else(|_| ApiErrorDetail {
        code: String::new(),
        description: data.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"chat_id\":\"abc\",").is_empty());
        let frames = decoder.push(b"\"text\":\"hi\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, None);
        assert_eq!(frames[0].data, r#"{"chat_id":"abc","text":"hi"}"#);
    }

    #[test]
    fn crlf_named_events_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(
            b": ping\r\n\r\nevent: error\r\ndata: {\"code\":\"error\",\"description\":\"boom\"}\r\nretry: 3000\r\n\r\n",
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("error"));
        assert_eq!(frames[0].retry, Some(3000));
        match decode_event(&frames[0]).unwrap() {
            Some(StreamEvent::Error(detail)) => assert_eq!(detail.description, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: line one\ndata: line two\n\n");
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn utf8_split_inside_a_character() {
        let text = "data: {\"chat_id\":\"c\",\"text\":\"ส่วนที่ 1\"}\n\n".as_bytes();
        let (head, tail) = text.split_at(30);
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        let frames = decoder.push(tail);
        match decode_event(&frames[0]).unwrap() {
            Some(StreamEvent::Message(p)) => assert_eq!(p.text.as_deref(), Some("ส่วนที่ 1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: FatalError\ndata: gone").is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.event.as_deref(), Some("FatalError"));
        assert_eq!(frame.data, "gone");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decode_fails_closed() {
        let unknown = SseFrame { event: Some("surprise".into()), ..Default::default() };
        assert!(matches!(decode_event(&unknown), Err(EngineError::Decode(_))));

        let not_json = SseFrame { data: "{'chat_id': 'abc'}".into(), ..Default::default() };
        assert!(matches!(decode_event(&not_json), Err(EngineError::Decode(_))));

        let wrong_type = SseFrame { data: r#"{"chat_id": 5, "text": "x"}"#.into(), ..Default::default() };
        assert!(matches!(decode_event(&wrong_type), Err(EngineError::Decode(_))));

        let keep_alive = SseFrame { data: "  ".into(), ..Default::default() };
        assert_eq!(decode_event(&keep_alive).unwrap(), None);
    }

    #[test]
    fn fatal_event_with_plain_body() {
        let frame = SseFrame {
            event: Some("FatalError".into()),
            data: "upstream closed".into(),
            ..Default::default()
        };
        let event = decode_event(&frame).unwrap().unwrap();
        assert_eq!(event, StreamEvent::Fatal(ApiErrorDetail {
            code: String::new(),
            description: "upstream closed".into(),
        }));
    }

    #[tokio::test]
    async fn frames_adapter_yields_then_surfaces_transport_error() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"chat_id\":\"a\",\"text\":\"x\"}\n".to_vec()),
            Ok(b"\n".to_vec()),
            Err("connection reset".into()),
            Ok(b"data: never\n\n".to_vec()),
        ];
        let mut stream = frames(futures::stream::iter(chunks));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.data, r#"{"chat_id":"a","text":"x"}"#);
        assert!(matches!(stream.next().await, Some(Err(EngineError::Stream(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn frames_adapter_flushes_on_eof() {
        let chunks: Vec<Result<&'static [u8], String>> = vec![Ok(&b"data: tail"[..])];
        let collected: Vec<_> = frames(futures::stream::iter(chunks)).collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].as_ref().unwrap().data, "tail");
    }
}

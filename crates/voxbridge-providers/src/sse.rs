//! Minimal SSE parsing for streaming completion responses.
//!
//! The completions endpoints only ever use `data:` lines, so this parser
//! ignores `event:`/`id:` fields and yields the data payload of each frame.

use futures::Stream;
use tokio_stream::StreamExt;

/// Incremental line-oriented SSE parser. Feed it raw body bytes, drain
/// complete `data` payloads.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of response body; returns the data payloads of any
    /// frames completed by this chunk.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Blank line terminates a frame.
                if !self.data_lines.is_empty() {
                    out.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.trim_start().to_string());
            }
            // Comments and event/id fields are ignored.
        }
        out
    }

    /// Flush a trailing unterminated frame at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            None
        } else {
            let data = self.data_lines.join("\n");
            self.data_lines.clear();
            Some(data)
        }
    }
}

/// Turn a streaming `reqwest` response into a stream of SSE data payloads.
pub fn data_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<String>> + Send {
    struct State {
        body: std::pin::Pin<
            Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
        >,
        parser: SseParser,
        ready: std::collections::VecDeque<String>,
        done: bool,
    }

    futures::stream::unfold(
        State {
            body: Box::pin(response.bytes_stream()),
            parser: SseParser::new(),
            ready: std::collections::VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(data) = state.ready.pop_front() {
                    return Some((Ok(data), state));
                }
                if state.done {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(bytes)) => {
                        state.ready.extend(state.parser.feed(&bytes));
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(anyhow::anyhow!("SSE body error: {e}")), state));
                    }
                    None => {
                        state.done = true;
                        if let Some(data) = state.parser.finish() {
                            state.ready.push_back(data);
                        }
                    }
                }
            }
        },
    )
}

//! Shared SSE streaming infrastructure for all provider adapters.
//!
//! Every provider follows the same pattern: receive a `reqwest::Response`,
//! buffer chunks, split on `\n\n`, extract `data:` payloads, and feed each
//! payload to a provider-specific parser that returns `Vec<Result<StreamEvent>>`.
//!
//! On top of that, this module:
//! - assembles partial tool-call fragments so consumers only ever see
//!   complete `ToolCallFinished` events, emitted before `Done`;
//! - watches the cancel token between chunks: when it fires the response
//!   is dropped (closing the upstream connection) and the stream ends
//!   with `Error::Cancelled`.

use serde_json::Value;

use crate::util::from_reqwest;
use wv_domain::cancel::CancelToken;
use wv_domain::error::{Error, Result};
use wv_domain::stream::{BoxStream, StreamEvent};

/// Pull every complete SSE event's `data:` payload out of `buffer`.
///
/// Everything up to the last `\n\n` is complete and gets consumed; a
/// trailing partial event stays in the buffer for the next chunk.
/// `event:`, `id:`, `retry:` and comment lines are bookkeeping the
/// adapters never need, so only `data:` fields come back.
pub(crate) fn take_data_payloads(buffer: &mut String) -> Vec<String> {
    let Some(end) = buffer.rfind("\n\n") else {
        return Vec::new();
    };
    let complete: String = buffer.drain(..end + 2).collect();

    let mut payloads = Vec::new();
    for block in complete.split("\n\n") {
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_owned());
                }
            }
        }
    }
    payloads
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates Started/Delta fragments and releases only complete calls.
#[derive(Default)]
pub(crate) struct ToolCallAssembler {
    /// call_id -> (tool_name, partial args JSON)
    open: Vec<(String, String, String)>,
}

impl ToolCallAssembler {
    /// Feed one parsed event; returns the events to surface downstream.
    pub(crate) fn push(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        match event {
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                self.open.push((call_id, tool_name, String::new()));
                Vec::new()
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some(entry) = self.open.iter_mut().find(|(id, _, _)| *id == call_id) {
                    entry.2.push_str(&delta);
                } else {
                    tracing::warn!(call_id = %call_id, "tool call delta without start, dropping");
                }
                Vec::new()
            }
            StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                self.open.retain(|(id, _, _)| *id != call_id);
                vec![StreamEvent::ToolCallFinished { call_id, tool_name, arguments }]
            }
            StreamEvent::Done { usage, finish_reason } => {
                let mut out = self.flush();
                out.push(StreamEvent::Done { usage, finish_reason });
                out
            }
            other => vec![other],
        }
    }

    /// Complete any still-open calls (providers that never send an explicit
    /// finish marker). Unparseable argument buffers become empty objects.
    pub(crate) fn flush(&mut self) -> Vec<StreamEvent> {
        self.open
            .drain(..)
            .map(|(call_id, tool_name, args)| {
                let arguments = if args.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&args).unwrap_or_else(|e| {
                        tracing::warn!(
                            call_id = %call_id,
                            tool = %tool_name,
                            error = %e,
                            "tool call arguments are not valid JSON; defaulting to empty object"
                        );
                        Value::Object(Default::default())
                    })
                };
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a provider-specific
/// parser closure.
///
/// The closure receives each `data:` payload string and returns zero or more
/// stream events.  It is `FnMut` (not `Fn`) because some providers (Anthropic)
/// need mutable state across calls for content-block bookkeeping.
///
/// The stream automatically:
/// 1. Buffers incoming chunks and drains complete SSE events
/// 2. Assembles tool-call fragments into atomic `ToolCallFinished` events
/// 3. Flushes the remaining buffer when the response body closes
/// 4. Emits a fallback `Done` event if the parser never produced one
/// 5. Aborts with `Error::Cancelled` (dropping the connection) on cancel
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
    cancel: CancelToken,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut assembler = ToolCallAssembler::default();
        let mut done_emitted = false;

        'outer: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Dropping `response` closes the upstream connection.
                    yield Err(Error::Cancelled);
                    return;
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in take_data_payloads(&mut buffer) {
                        for parsed in parse_data(&data) {
                            match parsed {
                                Ok(event) => {
                                    for event in assembler.push(event) {
                                        if matches!(&event, StreamEvent::Done { .. }) {
                                            done_emitted = true;
                                        }
                                        yield Ok(event);
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    break 'outer;
                                }
                            }
                        }
                    }
                }
                Ok(None) => {
                    // Stream ended -- flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in take_data_payloads(&mut buffer) {
                            for parsed in parse_data(&data) {
                                match parsed {
                                    Ok(event) => {
                                        for event in assembler.push(event) {
                                            if matches!(&event, StreamEvent::Done { .. }) {
                                                done_emitted = true;
                                            }
                                            yield Ok(event);
                                        }
                                    }
                                    Err(e) => {
                                        yield Err(e);
                                        break 'outer;
                                    }
                                }
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            for event in assembler.flush() {
                yield Ok(event);
            }
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_empty_buffer_yields_nothing() {
        let mut buf = String::new();
        assert!(take_data_payloads(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn payloads_partial_tail_waits_for_next_chunk() {
        let mut buf = String::from("data: whole\n\ndata: half");
        assert_eq!(take_data_payloads(&mut buf), vec!["whole"]);
        // The incomplete event is untouched until its delimiter arrives.
        assert_eq!(buf, "data: half");

        buf.push_str("-done\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["half-done"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn payloads_skip_bookkeeping_and_blank_data() {
        let mut buf = String::from("event: ping\nid: 9\nretry: 3000\ndata: \n\ndata: real\n\n");
        // The empty data field and the ping metadata both vanish.
        assert_eq!(take_data_payloads(&mut buf), vec!["real"]);
    }

    #[test]
    fn payloads_keep_done_sentinel_and_trim_padding() {
        let mut buf = String::from("data:   [DONE]  \n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn payloads_take_several_events_at_once() {
        let mut buf = String::from("data: a\n\nevent: x\ndata: b\n\ndata: c\n\n");
        assert_eq!(take_data_payloads(&mut buf), vec!["a", "b", "c"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn assembler_merges_fragments_atomically() {
        let mut asm = ToolCallAssembler::default();
        assert!(asm
            .push(StreamEvent::ToolCallStarted {
                call_id: "c1".into(),
                tool_name: "web_search".into(),
            })
            .is_empty());
        assert!(asm
            .push(StreamEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: "{\"query\":".into(),
            })
            .is_empty());
        assert!(asm
            .push(StreamEvent::ToolCallDelta {
                call_id: "c1".into(),
                delta: "\"rust\"}".into(),
            })
            .is_empty());

        let out = asm.push(StreamEvent::Done {
            usage: None,
            finish_reason: Some("tool_calls".into()),
        });
        assert_eq!(out.len(), 2);
        match &out[0] {
            StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                assert_eq!(call_id, "c1");
                assert_eq!(tool_name, "web_search");
                assert_eq!(arguments, &serde_json::json!({"query": "rust"}));
            }
            other => panic!("expected ToolCallFinished, got {other:?}"),
        }
        assert!(matches!(out[1], StreamEvent::Done { .. }));
    }

    #[test]
    fn assembler_defaults_bad_json_to_empty_object() {
        let mut asm = ToolCallAssembler::default();
        asm.push(StreamEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "exec".into(),
        });
        asm.push(StreamEvent::ToolCallDelta {
            call_id: "c1".into(),
            delta: "{not json".into(),
        });
        let out = asm.flush();
        assert_eq!(out.len(), 1);
        match &out[0] {
            StreamEvent::ToolCallFinished { arguments, .. } => {
                assert_eq!(arguments, &serde_json::json!({}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assembler_passes_tokens_through() {
        let mut asm = ToolCallAssembler::default();
        let out = asm.push(StreamEvent::Token { text: "hi".into() });
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], StreamEvent::Token { text } if text == "hi"));
    }

    #[test]
    fn explicit_finish_clears_open_entry() {
        let mut asm = ToolCallAssembler::default();
        asm.push(StreamEvent::ToolCallStarted {
            call_id: "c1".into(),
            tool_name: "web_search".into(),
        });
        let out = asm.push(StreamEvent::ToolCallFinished {
            call_id: "c1".into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({"query": "x"}),
        });
        assert_eq!(out.len(), 1);
        // No duplicate on Done.
        let done = asm.push(StreamEvent::Done { usage: None, finish_reason: None });
        assert_eq!(done.len(), 1);
    }
}

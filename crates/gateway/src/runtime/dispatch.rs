//! Tool dispatch: argument validation, bounded parallel execution,
//! per-call timeout, and start/progress/result event emission.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::sync::Semaphore;

use wv_domain::event::EventKind;
use wv_domain::tool::{ToolCall, ToolOutcome};
use wv_tools::{ToolContext, ToolOutput, ToolProgress};

use super::{truncate_str, NodeContext};

/// Execute a batch of tool calls concurrently.
///
/// Latency is max(tool latencies) instead of the sum. Results come back
/// in the original call order so tool messages line up with the calls.
/// Every failure mode (validation, handler error, timeout, cancel) is a
/// failed [`ToolOutcome`], never an `Err` — the LLM decides whether to
/// recover.
pub async fn dispatch_tool_calls(ctx: &NodeContext, calls: &[ToolCall]) -> Vec<ToolOutcome> {
    let semaphore = Arc::new(Semaphore::new(ctx.config.runtime.tool_concurrency.max(1)));
    let futures = calls.iter().map(|call| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await;
            run_one(ctx, call).await
        }
    });
    join_all(futures).await
}

async fn run_one(ctx: &NodeContext, call: &ToolCall) -> ToolOutcome {
    let started = std::time::Instant::now();

    if ctx.cancel.is_cancelled() {
        return ToolOutcome::cancelled(&call.call_id);
    }

    // Validate against the descriptor schema before starting.
    let args = match ctx
        .registry
        .validate_args(&call.tool_name, call.arguments.clone())
    {
        Ok(args) => args,
        Err(e) => {
            let outcome = ToolOutcome::err(&call.call_id, e.to_string(), 0);
            emit_result(ctx, call, &outcome);
            return outcome;
        }
    };

    ctx.bus.emit(
        EventKind::ToolStart,
        serde_json::json!({
            "call_id": call.call_id,
            "tool_name": call.tool_name,
            "arguments": args,
        }),
    );

    let descriptor = match ctx.registry.get(&call.tool_name) {
        Some(d) => d,
        None => {
            // validate_args already rejects unknown tools; belt only.
            let outcome =
                ToolOutcome::err(&call.call_id, format!("unknown tool {}", call.tool_name), 0);
            emit_result(ctx, call, &outcome);
            return outcome;
        }
    };

    let tool_ctx = ToolContext {
        thread_id: ctx.thread_id.clone(),
        call_id: call.call_id.clone(),
        cancel: ctx.cancel.clone(),
    };

    let timeout = Duration::from_secs(ctx.config.runtime.tool_timeout_secs);
    let span = tracing::info_span!("tool.call", tool_name = %call.tool_name);
    let _guard = span.enter();

    let invocation = descriptor.handler.invoke(tool_ctx, args);
    let outcome = match tokio::time::timeout(timeout, invocation).await {
        Err(_) => ToolOutcome::err(
            &call.call_id,
            format!(
                "timed out after {}s",
                ctx.config.runtime.tool_timeout_secs
            ),
            started.elapsed().as_millis() as u64,
        ),
        Ok(Err(e)) => {
            ToolOutcome::err(&call.call_id, e.to_string(), started.elapsed().as_millis() as u64)
        }
        Ok(Ok(ToolOutput::Value(v))) => ToolOutcome::ok(
            &call.call_id,
            value_to_content(&v),
            started.elapsed().as_millis() as u64,
        ),
        Ok(Ok(ToolOutput::Stream { progress, result })) => {
            drain_progress(ctx, call, progress).await;
            match tokio::time::timeout(timeout, result).await {
                Ok(Ok(v)) => ToolOutcome::ok(
                    &call.call_id,
                    value_to_content(&v),
                    started.elapsed().as_millis() as u64,
                ),
                Ok(Err(e)) => ToolOutcome::err(
                    &call.call_id,
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                ),
                Err(_) => ToolOutcome::err(
                    &call.call_id,
                    format!("timed out after {}s", ctx.config.runtime.tool_timeout_secs),
                    started.elapsed().as_millis() as u64,
                ),
            }
        }
    };

    emit_result(ctx, call, &outcome);
    outcome
}

/// Forward a streaming handler's progress items as events.
async fn drain_progress(
    ctx: &NodeContext,
    call: &ToolCall,
    mut progress: wv_domain::stream::BoxStream<'static, wv_domain::error::Result<ToolProgress>>,
) {
    while let Some(item) = progress.next().await {
        match item {
            Ok(ToolProgress::Progress { data }) => {
                ctx.bus.emit(
                    EventKind::ToolProgress,
                    serde_json::json!({ "call_id": call.call_id, "data": data }),
                );
            }
            Ok(ToolProgress::Screenshot { data, mime }) => {
                ctx.bus.emit(
                    EventKind::ToolScreenshot,
                    serde_json::json!({ "call_id": call.call_id, "data": data, "mime": mime }),
                );
            }
            Err(e) => {
                tracing::warn!(call_id = %call.call_id, error = %e, "tool progress stream error");
                break;
            }
        }
    }
}

fn emit_result(ctx: &NodeContext, call: &ToolCall, outcome: &ToolOutcome) {
    let kind = if outcome.success {
        EventKind::ToolResult
    } else {
        EventKind::ToolError
    };
    ctx.bus.emit(
        kind,
        serde_json::json!({
            "call_id": call.call_id,
            "tool_name": call.tool_name,
            "content": truncate_str(&outcome.content, 2_000),
            "success": outcome.success,
            "duration_ms": outcome.duration_ms,
        }),
    );
}

/// String results stay readable; structured results travel as JSON text.
fn value_to_content(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

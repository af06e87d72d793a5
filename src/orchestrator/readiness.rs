//! Startup readiness detection via log-pattern matching.
//!
//! A probe follows the container's log stream from the beginning and
//! resolves as soon as the configured regex matches the accumulated
//! output, the deadline passes, or the container dies first. The
//! retained window is capped so chatty containers cannot grow the
//! buffer without bound.

use futures::StreamExt;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::engine::{EngineApi, Result};

/// Retained log text the pattern is matched against.
const MAX_WINDOW_BYTES: usize = 64 * 1024;

/// Pause before reopening a log stream that closed under a live container.
const REOPEN_DELAY: std::time::Duration = std::time::Duration::from_millis(250);

/// How a readiness wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// The pattern matched the log output.
    Ready,
    /// The deadline passed without a match.
    TimedOut,
    /// The container stopped before the pattern matched.
    ContainerExited(i64),
}

/// Wait until `pattern` appears in the container's combined log output.
///
/// The stream is dropped on every exit path, which releases the
/// underlying connection; a follow-mode stream never outlives the wait.
///
/// # Errors
///
/// Returns an error if the engine calls themselves fail; pattern
/// mismatch and container death are outcomes, not errors.
pub async fn await_pattern<E: EngineApi + ?Sized>(
    engine: &E,
    container_id: &str,
    pattern: &Regex,
    deadline: Instant,
) -> Result<ReadinessOutcome> {
    let mut window = String::new();
    loop {
        let mut stream = engine.stream_logs(container_id, true).await?;
        // The stream replays from container start, so the window restarts too.
        window.clear();

        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => {
                    debug!("Deadline passed waiting for /{}/ on {}", pattern, container_id);
                    return Ok(ReadinessOutcome::TimedOut);
                }
                Ok(Some(Ok(chunk))) => {
                    append_to_window(&mut window, &chunk);
                    if pattern.is_match(&window) {
                        trace!("Pattern /{}/ matched on {}", pattern, container_id);
                        return Ok(ReadinessOutcome::Ready);
                    }
                }
                Ok(Some(Err(err))) => return Err(err),
                Ok(None) => break,
            }
        }
        drop(stream);

        // Stream closed without a match: either the container exited, or
        // the engine ended a log session on a still-running container.
        let inspect = engine.inspect_container(container_id).await?;
        if !inspect.state.running {
            debug!(
                "Container {} exited with status {} before matching /{}/",
                container_id, inspect.state.exit_code, pattern
            );
            return Ok(ReadinessOutcome::ContainerExited(inspect.state.exit_code));
        }

        if Instant::now() + REOPEN_DELAY >= deadline {
            return Ok(ReadinessOutcome::TimedOut);
        }
        tokio::time::sleep(REOPEN_DELAY).await;
    }
}

/// Append decoded bytes, trimming the front to the retention cap.
fn append_to_window(window: &mut String, chunk: &[u8]) {
    window.push_str(&String::from_utf8_lossy(chunk));
    if window.len() > MAX_WINDOW_BYTES {
        let mut cut = window.len() - MAX_WINDOW_BYTES;
        while !window.is_char_boundary(cut) {
            cut += 1;
        }
        window.drain(..cut);
    }
}

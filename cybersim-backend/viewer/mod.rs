pub mod watch;

use std::time::Duration;

use serde_json::Value;

/// What a text frame from the live endpoint turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Subscribed(String),
    Error(String),
    /// The run's full output so far; replaced the transcript.
    Backfill,
    /// A live chunk; appended to the transcript.
    Output,
}

/// A viewer's rendered log of one run.
///
/// The server only sends control frames in reply to a subscribe request, so
/// a frame is read as `subscribed` or `error` only between `expect_reply`
/// and that reply. Everything else is run output, whatever it looks like.
///
/// The first text frame after a `subscribed` ack is the backfill and replaces
/// everything held so far, so receiving the same bytes twice (once live, once
/// in a later backfill) never duplicates them. `take_unprinted` hands out
/// only the suffix that has not been shown yet.
#[derive(Debug, Default)]
pub struct Transcript {
    text: String,
    printed: usize,
    reply_pending: bool,
    awaiting_backfill: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Call after sending a subscribe request: the next control-shaped
    /// frame is the server's reply.
    pub fn expect_reply(&mut self) {
        self.reply_pending = true;
        self.awaiting_backfill = false;
    }

    pub fn apply(&mut self, frame: &str) -> Frame {
        if self.awaiting_backfill {
            self.awaiting_backfill = false;
            self.replace(frame);
            return Frame::Backfill;
        }

        if self.reply_pending {
            match control_frame(frame) {
                Some(Frame::Subscribed(run_id)) => {
                    self.reply_pending = false;
                    self.awaiting_backfill = true;
                    return Frame::Subscribed(run_id);
                }
                Some(error) => {
                    self.reply_pending = false;
                    return error;
                }
                None => {}
            }
        }

        self.text.push_str(frame);
        Frame::Output
    }

    /// Swap in an authoritative copy of the output.
    pub fn replace(&mut self, output: &str) {
        let shown = self.text.get(..self.printed).unwrap_or_default();
        if !output.starts_with(shown) {
            tracing::warn!("run output diverged from what was already shown");
            self.printed = 0;
        }
        self.text = output.to_string();
    }

    /// Text received since the last call.
    pub fn take_unprinted(&mut self) -> String {
        let rest = self.text.get(self.printed..).unwrap_or_default().to_string();
        self.printed = self.text.len();
        rest
    }
}

/// `{"type":"subscribed",...}` and `{"error":...}` replies.
fn control_frame(frame: &str) -> Option<Frame> {
    if !frame.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(frame).ok()?;
    let object = value.as_object()?;

    if object.get("type").and_then(Value::as_str) == Some("subscribed") {
        let run_id = object.get("runId").and_then(Value::as_str)?;
        return Some(Frame::Subscribed(run_id.to_string()));
    }
    if object.len() == 1 {
        if let Some(error) = object.get("error").and_then(Value::as_str) {
            return Some(Frame::Error(error.to_string()));
        }
    }
    None
}

/// Backoff between reconnect attempts of a watching viewer.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before consecutive retry `attempt` (1-based), or `None` once
    /// the attempts are used up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

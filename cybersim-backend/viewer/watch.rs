use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use super::{Frame, ReconnectPolicy, Transcript};
use crate::runs::{Run, RunStatus};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct WatchOptions {
    /// Base HTTP URL of the server, e.g. `http://localhost:5000`.
    pub server: String,
    pub run_id: String,
    pub policy: ReconnectPolicy,
    pub poll_interval: Duration,
}

impl WatchOptions {
    pub fn new(server: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            run_id: run_id.into(),
            policy: ReconnectPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

enum Outcome {
    Finished(RunStatus),
    /// The connection went away; `acknowledged` is whether the server had
    /// confirmed the subscription first.
    Dropped { acknowledged: bool },
    Rejected(String),
}

/// Follow a run's output until it reaches a terminal status, writing the
/// transcript to `out` as it grows. Reconnects with backoff when the live
/// connection drops and resubscribes every time.
pub async fn watch<W: Write>(opts: &WatchOptions, out: &mut W) -> Result<RunStatus> {
    let ws_url = live_url(&opts.server)?;
    let http = reqwest::Client::new();
    let mut transcript = Transcript::new();
    let mut failures: u32 = 0;

    loop {
        match follow(opts, &ws_url, &http, &mut transcript, out).await {
            Ok(Outcome::Finished(status)) => return Ok(status),
            Ok(Outcome::Rejected(error)) => bail!("server rejected subscription: {error}"),
            Ok(Outcome::Dropped { acknowledged: true }) => {
                tracing::info!(run_id = %opts.run_id, "live connection closed, reconnecting");
                failures = 1;
            }
            Ok(Outcome::Dropped { acknowledged: false }) => {
                failures += 1;
                tracing::warn!(run_id = %opts.run_id, attempt = failures, "live connection closed before subscribing");
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(run_id = %opts.run_id, attempt = failures, error = %e, "live connection failed");
            }
        }

        // the run may have ended while we were away
        if let Ok(Some(run)) = fetch_run(&http, opts).await {
            if run.status.is_terminal() {
                return finish(&mut transcript, &run, out);
            }
        }

        let Some(delay) = opts.policy.delay(failures) else {
            bail!(
                "giving up on run {} after {} reconnect attempts",
                opts.run_id,
                opts.policy.max_attempts
            );
        };
        tracing::info!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// One live connection: subscribe, render frames, poll the run record.
async fn follow<W: Write>(
    opts: &WatchOptions,
    ws_url: &str,
    http: &reqwest::Client,
    transcript: &mut Transcript,
    out: &mut W,
) -> Result<Outcome> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_url)
        .await
        .context("Failed to connect WebSocket")?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = json!({ "type": "subscribe", "runId": opts.run_id }).to_string();
    write
        .send(Message::Text(subscribe.into()))
        .await
        .context("Failed to send subscribe request")?;
    transcript.expect_reply();
    tracing::debug!(run_id = %opts.run_id, "subscribe request sent");

    let mut acknowledged = false;
    let mut poll = tokio::time::interval(opts.poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match transcript.apply(text.as_str()) {
                        Frame::Error(error) => return Ok(Outcome::Rejected(error)),
                        Frame::Subscribed(run_id) => {
                            acknowledged = true;
                            tracing::debug!(run_id = %run_id, "subscription acknowledged");
                        }
                        Frame::Backfill | Frame::Output => print_new(transcript, out)?,
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(Outcome::Dropped { acknowledged }),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    return Ok(Outcome::Dropped { acknowledged });
                }
            },
            _ = poll.tick() => match fetch_run(http, opts).await {
                Ok(Some(run)) if run.status.is_terminal() => {
                    let status = finish(transcript, &run, out)?;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Outcome::Finished(status));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "failed to poll run status"),
            },
        }
    }
}

fn finish<W: Write>(transcript: &mut Transcript, run: &Run, out: &mut W) -> Result<RunStatus> {
    transcript.replace(&run.output);
    print_new(transcript, out)?;
    Ok(run.status)
}

fn print_new<W: Write>(transcript: &mut Transcript, out: &mut W) -> Result<()> {
    let text = transcript.take_unprinted();
    if !text.is_empty() {
        out.write_all(text.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}

async fn fetch_run(http: &reqwest::Client, opts: &WatchOptions) -> Result<Option<Run>> {
    let resp = http
        .get(format!("{}/api/runs/{}", opts.server, opts.run_id))
        .send()
        .await
        .context("Failed to fetch run")?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let run = resp
        .error_for_status()
        .context("Run lookup failed")?
        .json::<Run>()
        .await
        .context("Failed to parse run")?;
    Ok(Some(run))
}

fn live_url(server: &str) -> Result<String> {
    let base = server.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws"))
    } else if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws"))
    } else {
        bail!("server URL must start with http:// or https://: {server}")
    }
}

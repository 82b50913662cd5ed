use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::runs::hub::{BroadcastHub, HubEvent, ViewerHandle};
use crate::runs::repository::RunRepository;

const INVALID_RUN_ID: &str = "Invalid runId";
const RUN_NOT_FOUND: &str = "Run not found";
const INVALID_FORMAT: &str = "Invalid message format";

/// A frame the session sends to its viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    Subscribed(String),
    /// Raw run output: the backfill right after `Subscribed`, live chunks
    /// otherwise.
    Output(String),
    Error(&'static str),
}

impl Outbound {
    fn into_message(self) -> Message {
        match self {
            Outbound::Subscribed(run_id) => Message::Text(
                json!({ "type": "subscribed", "runId": run_id })
                    .to_string()
                    .into(),
            ),
            Outbound::Output(text) => Message::Text(text.into()),
            Outbound::Error(msg) => Message::Text(json!({ "error": msg }).to_string().into()),
        }
    }
}

struct Subscription {
    run_id: String,
    /// Bytes of the run's output this viewer already holds.
    delivered: usize,
}

/// Protocol state of one viewer connection: which run it watches and how far
/// into that run's output it has been served.
pub(crate) struct ViewerSession {
    store: Arc<dyn RunRepository>,
    hub: Arc<BroadcastHub>,
    handle: ViewerHandle,
    current: Option<Subscription>,
}

impl ViewerSession {
    pub(crate) fn new(
        store: Arc<dyn RunRepository>,
        hub: Arc<BroadcastHub>,
        handle: ViewerHandle,
    ) -> Self {
        Self {
            store,
            hub,
            handle,
            current: None,
        }
    }

    pub(crate) fn current_run(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.run_id.as_str())
    }

    /// Handle one inbound text frame.
    pub(crate) async fn on_text(&mut self, text: &str) -> Vec<Outbound> {
        match parse_subscribe(text) {
            Ok(run_id) => self.subscribe(run_id).await,
            Err(reply) => vec![reply],
        }
    }

    async fn subscribe(&mut self, run_id: String) -> Vec<Outbound> {
        if self.store.get_run(&run_id).await.is_none() {
            return vec![Outbound::Error(RUN_NOT_FOUND)];
        }

        if let Some(previous) = self.current.take() {
            if previous.run_id != run_id {
                self.hub
                    .unsubscribe(&previous.run_id, self.handle.id())
                    .await;
            }
        }

        // register first so nothing appended after the backfill read is lost
        self.hub.subscribe(&run_id, &self.handle).await;
        self.backfill(&run_id).await
    }

    /// Send the ack and the run's whole output, then serve live chunks from
    /// the end of that output.
    async fn backfill(&mut self, run_id: &str) -> Vec<Outbound> {
        let Some(run) = self.store.get_run(run_id).await else {
            self.hub.unsubscribe(run_id, self.handle.id()).await;
            self.current = None;
            return vec![Outbound::Error(RUN_NOT_FOUND)];
        };

        if run.status.is_terminal() {
            self.hub.unsubscribe(run_id, self.handle.id()).await;
        }
        tracing::debug!(
            run_id,
            viewer = self.handle.id(),
            bytes = run.output.len(),
            status = %run.status,
            "sending backfill"
        );

        self.current = Some(Subscription {
            run_id: run_id.to_string(),
            delivered: run.output.len(),
        });
        vec![
            Outbound::Subscribed(run_id.to_string()),
            Outbound::Output(run.output),
        ]
    }

    /// Send everything stored past what this viewer holds as plain output.
    /// Control frames only ever answer a subscribe request.
    async fn catch_up(&mut self, run_id: &str) -> Vec<Outbound> {
        let Some(run) = self.store.get_run(run_id).await else {
            return Vec::new();
        };
        let Some(sub) = self.current.as_mut() else {
            return Vec::new();
        };
        match run.output.get(sub.delivered..) {
            Some("") => Vec::new(),
            Some(missed) => {
                sub.delivered = run.output.len();
                vec![Outbound::Output(missed.to_string())]
            }
            None => {
                tracing::warn!(
                    run_id,
                    viewer = self.handle.id(),
                    delivered = sub.delivered,
                    stored = run.output.len(),
                    "viewer offset does not match stored output"
                );
                Vec::new()
            }
        }
    }

    /// Handle one event from the hub inbox.
    pub(crate) async fn on_event(&mut self, event: HubEvent) -> Vec<Outbound> {
        match event {
            HubEvent::Chunk {
                run_id,
                offset,
                text,
            } => {
                let Some(sub) = self.current.as_mut() else {
                    return Vec::new();
                };
                if *run_id != *sub.run_id {
                    return Vec::new();
                }

                let end = offset + text.len();
                if end <= sub.delivered {
                    return Vec::new();
                }
                if offset > sub.delivered {
                    tracing::debug!(
                        run_id = %run_id,
                        viewer = self.handle.id(),
                        missed = offset - sub.delivered,
                        "viewer fell behind, catching up from the store"
                    );
                    return self.catch_up(&run_id).await;
                }

                match text.get(sub.delivered - offset..) {
                    Some(rest) => {
                        sub.delivered = end;
                        vec![Outbound::Output(rest.to_string())]
                    }
                    None => self.catch_up(&run_id).await,
                }
            }
            HubEvent::Terminal { run_id, status } => {
                if self.current_run() == Some(&*run_id) {
                    self.hub.unsubscribe(&run_id, self.handle.id()).await;
                    tracing::debug!(run_id = %run_id, viewer = self.handle.id(), %status, "watched run finished");
                }
                Vec::new()
            }
        }
    }

    /// Drop the hub registration. Called on every disconnect path.
    pub(crate) async fn close(&mut self) {
        if let Some(sub) = self.current.take() {
            self.hub.unsubscribe(&sub.run_id, self.handle.id()).await;
        }
    }
}

/// Validate a `{"type":"subscribe","runId":"<uuid>"}` request and return the
/// normalized run id.
fn parse_subscribe(text: &str) -> Result<String, Outbound> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| Outbound::Error(INVALID_FORMAT))?;
    if value.get("type").and_then(Value::as_str) != Some("subscribe") {
        return Err(Outbound::Error(INVALID_FORMAT));
    }
    value
        .get("runId")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
        .map(|id| id.to_string())
        .ok_or(Outbound::Error(INVALID_RUN_ID))
}

/// GET /ws: live run output for viewers.
pub(crate) async fn live_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (handle, mut inbox) = state.hub.register_viewer();
    let viewer = handle.id();
    let mut session = ViewerSession::new(state.run_repo.clone(), state.hub.clone(), handle);

    tracing::info!(viewer, "viewer connected");

    loop {
        let replies = tokio::select! {
            inbound = ws_stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => session.on_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(viewer, error = %e, "viewer transport error");
                    break;
                }
            },
            Some(event) = inbox.recv() => session.on_event(event).await,
        };

        if let Err(e) = send_all(&mut ws_sink, replies).await {
            tracing::debug!(viewer, error = %e, "failed to send to viewer");
            break;
        }
    }

    session.close().await;
    let active_runs = state.hub.active_runs().await;
    tracing::info!(viewer, active_runs, "viewer disconnected");
}

async fn send_all(
    sink: &mut SplitSink<WebSocket, Message>,
    replies: Vec<Outbound>,
) -> Result<(), axum::Error> {
    for reply in replies {
        sink.send(reply.into_message()).await?;
    }
    Ok(())
}

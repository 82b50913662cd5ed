use std::collections::HashSet;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::decode::StreamDecoder;
use super::hub::BroadcastHub;
use super::repository::RunRepository;
use super::{Run, RunError, RunStatus, RunUpdate};

const READ_BUFFER_BYTES: usize = 4096;
const FINALIZE_BASE_DELAY: Duration = Duration::from_millis(100);

enum OutputEvent {
    Chunk(String),
    ReadError {
        stream: &'static str,
        message: String,
    },
}

/// Drives runs from `pending` to a terminal status: spawns the command,
/// appends every output chunk to the run store and then publishes it to the
/// hub, and persists the final record.
pub struct RunSupervisor {
    store: Arc<dyn RunRepository>,
    hub: Arc<BroadcastHub>,
    shell: String,
    finalize_retries: u32,
    /// Run ids with a live driver task.
    active: Mutex<HashSet<String>>,
}

impl RunSupervisor {
    pub fn new(
        store: Arc<dyn RunRepository>,
        hub: Arc<BroadcastHub>,
        shell: impl Into<String>,
        finalize_retries: u32,
    ) -> Self {
        Self {
            store,
            hub,
            shell: shell.into(),
            finalize_retries: finalize_retries.max(1),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Create a pending run for `scenario_id` and start it in the background.
    /// Returns as soon as the run is scheduled; its outcome is only
    /// observable through the run store.
    pub async fn launch(
        self: &Arc<Self>,
        scenario_id: &str,
        user_id: &str,
        command: &str,
    ) -> Result<Run, RunError> {
        if command.trim().is_empty() {
            return Err(RunError::EmptyCommand);
        }
        let run = self.store.create_run(scenario_id, user_id).await?;
        if let Err(e) = self.start_run(&run.id, command).await {
            self.abandon(&run.id, &e).await;
            return Err(e);
        }
        Ok(run)
    }

    /// Fail a freshly created run that could not be started. If the store
    /// keeps refusing writes, the record stays pending until `load_all`
    /// fails it on the next start.
    async fn abandon(&self, run_id: &str, error: &RunError) {
        let notice = format!("[ERROR] Execution failed: {error}\n");
        let closed: Result<Run, RunError> = async {
            self.store.append_output(run_id, &notice).await?;
            self.store
                .update_run(run_id, RunUpdate::status(RunStatus::Running))
                .await?;
            self.store
                .update_run(
                    run_id,
                    RunUpdate::terminal(RunStatus::Failed, Utc::now(), 0),
                )
                .await
        }
        .await;

        match closed {
            Ok(_) => {
                self.hub.notify_terminal(run_id, RunStatus::Failed).await;
            }
            Err(e) => {
                tracing::error!(run_id, error = %e, "failed to close out run that never started");
            }
        }
    }

    /// Move an existing run to `running` and spawn its driver task.
    pub async fn start_run(
        self: &Arc<Self>,
        run_id: &str,
        command: &str,
    ) -> Result<JoinHandle<()>, RunError> {
        if command.trim().is_empty() {
            return Err(RunError::EmptyCommand);
        }

        let run = self
            .store
            .get_run(run_id)
            .await
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;
        match run.status {
            RunStatus::Pending => {}
            RunStatus::Running => return Err(RunError::AlreadyRunning(run_id.to_string())),
            terminal => {
                return Err(RunError::InvalidTransition {
                    from: terminal,
                    to: RunStatus::Running,
                });
            }
        }

        if !self.active.lock().await.insert(run_id.to_string()) {
            return Err(RunError::AlreadyRunning(run_id.to_string()));
        }

        let started = Instant::now();
        if let Err(e) = self
            .store
            .update_run(run_id, RunUpdate::status(RunStatus::Running))
            .await
        {
            self.release(run_id).await;
            return Err(e);
        }

        let supervisor = Arc::clone(self);
        let run_id = run_id.to_string();
        let command = command.to_string();
        Ok(tokio::spawn(async move {
            supervisor.drive(run_id, command, started).await;
        }))
    }

    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    async fn drive(self: Arc<Self>, run_id: String, command: String, started: Instant) {
        let viewers = self.hub.subscriber_count(&run_id).await;
        tracing::info!(command = %command, viewers, "executing scenario run");

        let mut at_line_start = true;
        let status = match self.spawn(&command) {
            Ok(child) => self.stream_output(&run_id, child, &mut at_line_start).await,
            Err(e) => {
                tracing::error!(error = %e, "failed to launch command");
                self.notice(
                    &run_id,
                    &format!("[ERROR] Execution failed: {e}"),
                    &mut at_line_start,
                )
                .await;
                RunStatus::Failed
            }
        };
        self.notice(&run_id, "[INFO] Execution completed", &mut at_line_start)
            .await;

        let duration = started.elapsed().as_secs();
        self.finalize(&run_id, status, duration).await;
        self.hub.notify_terminal(&run_id, status).await;
        self.release(&run_id).await;
        tracing::info!(%status, duration, "scenario run finished");
    }

    fn spawn(&self, command: &str) -> std::io::Result<Child> {
        Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// Merge stdout and stderr into one ordered append sequence, then wait
    /// for the process. Returns the terminal status to record.
    async fn stream_output(
        &self,
        run_id: &str,
        mut child: Child,
        at_line_start: &mut bool,
    ) -> RunStatus {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_stream("stdout", stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_stream("stderr", stderr, tx.clone())));
        }
        drop(tx);

        let stream_failed = self.pump(run_id, rx, at_line_start).await;
        for reader in readers {
            let _ = reader.await;
        }

        match child.wait().await {
            Ok(exit) => {
                self.notice(run_id, &exit_notice(&exit), at_line_start).await;
                exit_status(&exit, stream_failed)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to wait for process");
                self.notice(
                    run_id,
                    &format!("[ERROR] Failed to wait for process: {e}"),
                    at_line_start,
                )
                .await;
                RunStatus::Failed
            }
        }
    }

    /// Record reader events in arrival order until both readers are done.
    /// Returns whether either stream failed mid-run.
    async fn pump(
        &self,
        run_id: &str,
        mut rx: mpsc::UnboundedReceiver<OutputEvent>,
        at_line_start: &mut bool,
    ) -> bool {
        let mut stream_failed = false;
        while let Some(event) = rx.recv().await {
            match event {
                OutputEvent::Chunk(text) => self.emit(run_id, &text, at_line_start).await,
                OutputEvent::ReadError { stream, message } => {
                    tracing::warn!(stream, error = %message, "output stream read failed");
                    stream_failed = true;
                    self.notice(
                        run_id,
                        &format!("[ERROR] Output stream error ({stream}): {message}"),
                        at_line_start,
                    )
                    .await;
                }
            }
        }
        stream_failed
    }

    /// Append to the store, then publish. A chunk the store refused is
    /// never published.
    async fn emit(&self, run_id: &str, text: &str, at_line_start: &mut bool) {
        if text.is_empty() {
            return;
        }
        match self.store.append_output(run_id, text).await {
            Ok(len) => {
                *at_line_start = text.ends_with('\n');
                let offset = len - text.len();
                self.hub.publish(run_id, offset, text).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to append run output");
            }
        }
    }

    /// Emit an informational line, starting it on a fresh line.
    async fn notice(&self, run_id: &str, line: &str, at_line_start: &mut bool) {
        let text = if *at_line_start {
            format!("{line}\n")
        } else {
            format!("\n{line}\n")
        };
        self.emit(run_id, &text, at_line_start).await;
    }

    /// Persist the terminal status, retrying store failures with backoff.
    async fn finalize(&self, run_id: &str, status: RunStatus, duration: u64) -> bool {
        let update = RunUpdate::terminal(status, Utc::now(), duration);
        let mut delay = FINALIZE_BASE_DELAY;

        for attempt in 1..=self.finalize_retries {
            match self.store.update_run(run_id, update.clone()).await {
                Ok(_) => return true,
                Err(RunError::Store(e)) if attempt < self.finalize_retries => {
                    tracing::warn!(attempt, error = %e, "failed to persist terminal status, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(
                        attempt,
                        %status,
                        error = %e,
                        "failed to persist terminal status; run stays non-terminal in the store"
                    );
                    return false;
                }
            }
        }
        false
    }

    async fn release(&self, run_id: &str) {
        self.active.lock().await.remove(run_id);
    }
}

async fn read_stream<R>(stream: &'static str, mut reader: R, tx: mpsc::UnboundedSender<OutputEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = StreamDecoder::new();
    let mut buf = [0u8; READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buf[..n]);
                if !text.is_empty() && tx.send(OutputEvent::Chunk(text)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(OutputEvent::ReadError {
                    stream,
                    message: e.to_string(),
                });
                break;
            }
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(OutputEvent::Chunk(rest));
    }
}

/// A broken output stream fails the run whatever the exit code.
fn exit_status(exit: &ExitStatus, stream_failed: bool) -> RunStatus {
    if exit.success() && !stream_failed {
        RunStatus::Success
    } else {
        RunStatus::Failed
    }
}

fn exit_notice(exit: &ExitStatus) -> String {
    if let Some(code) = exit.code() {
        return format!("[INFO] Process exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = exit.signal() {
            return format!("[INFO] Process terminated by signal {signal}");
        }
    }
    "[INFO] Process terminated without an exit code".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunStats;
    use crate::runs::file_repository::FileRunRepository;
    use crate::runs::hub::HubEvent;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::task::{Context as TaskContext, Poll};
    use tempfile::{TempDir, tempdir};
    use tokio::io::ReadBuf;

    struct Fixture {
        _dir: TempDir,
        store: Arc<FileRunRepository>,
        hub: Arc<BroadcastHub>,
        supervisor: Arc<RunSupervisor>,
    }

    async fn fixture_with_shell(shell: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileRunRepository::new(dir.path()));
        store.load_all().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(1024));
        let supervisor = Arc::new(RunSupervisor::new(
            store.clone(),
            hub.clone(),
            shell,
            3,
        ));
        Fixture {
            _dir: dir,
            store,
            hub,
            supervisor,
        }
    }

    async fn is_active(supervisor: &RunSupervisor, run_id: &str) -> bool {
        supervisor.active.lock().await.contains(run_id)
    }

    async fn fixture() -> Fixture {
        fixture_with_shell("/bin/sh").await
    }

    async fn run_to_end(fx: &Fixture, command: &str) -> Run {
        let run = fx.store.create_run("scenario", "user").await.unwrap();
        let handle = fx.supervisor.start_run(&run.id, command).await.unwrap();
        handle.await.unwrap();
        fx.store.get_run(&run.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_echo_hello_succeeds() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "echo hello").await;

        assert_eq!(run.status, RunStatus::Success);
        assert!(run.output.contains("hello"));
        assert!(run.output.contains("[INFO] Process exited with code 0"));
        assert!(run.output.ends_with("[INFO] Execution completed\n"));
        assert!(run.duration.is_some());
        assert!(run.end_time.is_some());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_code_notice() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "exit 3").await;

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.output.contains("[INFO] Process exited with code 3"));
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_are_merged() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "echo to-out; echo to-err 1>&2").await;

        assert_eq!(run.status, RunStatus::Success);
        assert!(run.output.contains("to-out\n"));
        assert!(run.output.contains("to-err\n"));
    }

    #[tokio::test]
    async fn test_order_within_a_stream_is_preserved() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "printf 'a\\nb\\nc\\n'").await;
        assert!(run.output.starts_with("a\nb\nc\n"));
    }

    #[tokio::test]
    async fn test_unterminated_output_gets_notice_on_new_line() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "printf partial").await;
        assert!(run.output.starts_with("partial\n[INFO] Process exited with code 0\n"));
    }

    #[tokio::test]
    async fn test_launch_failure_marks_run_failed() {
        let fx = fixture_with_shell("/nonexistent/shell").await;
        let run = run_to_end(&fx, "echo never").await;

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.output.contains("[ERROR] Execution failed:"));
        assert!(run.duration.is_some());
        assert!(!is_active(&fx.supervisor, &run.id).await);
    }

    #[tokio::test]
    async fn test_unknown_command_fails() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "definitely-not-a-command-xyz").await;
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_start_rejects_running_run() {
        let fx = fixture().await;
        let run = fx.store.create_run("scenario", "user").await.unwrap();
        let handle = fx.supervisor.start_run(&run.id, "sleep 0.3").await.unwrap();

        let err = fx
            .supervisor
            .start_run(&run.id, "echo second")
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::AlreadyRunning(_)));

        handle.await.unwrap();
        let finished = fx.store.get_run(&run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Success);
        assert!(!finished.output.contains("second"));
    }

    #[tokio::test]
    async fn test_start_rejects_terminal_unknown_and_empty() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "true").await;

        let err = fx.supervisor.start_run(&run.id, "true").await.unwrap_err();
        assert!(matches!(err, RunError::InvalidTransition { .. }));

        let err = fx.supervisor.start_run("missing", "true").await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));

        let err = fx.supervisor.start_run(&run.id, "   ").await.unwrap_err();
        assert!(matches!(err, RunError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_launch_returns_before_completion() {
        let fx = fixture().await;
        let run = fx
            .supervisor
            .launch("scenario", "user", "sleep 0.2; echo late")
            .await
            .unwrap();

        let current = fx.store.get_run(&run.id).await.unwrap();
        assert_eq!(current.status, RunStatus::Running);
        assert_eq!(current.scenario_id, "scenario");
        assert!(is_active(&fx.supervisor, &run.id).await);
    }

    #[tokio::test]
    async fn test_early_subscriber_transcript_matches_store() {
        let fx = fixture().await;
        let run = fx.store.create_run("scenario", "user").await.unwrap();
        let (viewer, mut rx) = fx.hub.register_viewer();
        fx.hub.subscribe(&run.id, &viewer).await;

        let handle = fx
            .supervisor
            .start_run(&run.id, "echo one; echo two 1>&2; echo three")
            .await
            .unwrap();
        handle.await.unwrap();

        let mut transcript = String::new();
        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            match event {
                HubEvent::Chunk { offset, text, .. } => {
                    assert_eq!(offset, transcript.len());
                    transcript.push_str(&text);
                }
                HubEvent::Terminal { status, .. } => {
                    terminal = Some(status);
                    break;
                }
            }
        }

        let stored = fx.store.get_run(&run.id).await.unwrap();
        assert_eq!(terminal, Some(RunStatus::Success));
        assert_eq!(transcript, stored.output);
        assert_eq!(fx.hub.active_runs().await, 0);
    }

    #[tokio::test]
    async fn test_output_frozen_after_terminal() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "echo done").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let again = fx.store.get_run(&run.id).await.unwrap();
        assert_eq!(again.output, run.output);
        assert_eq!(again.status, run.status);
    }

    #[tokio::test]
    async fn test_killed_by_signal_fails_with_signal_notice() {
        let fx = fixture().await;
        let run = run_to_end(&fx, "echo before; kill -9 $$").await;

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.output.starts_with("before\n"));
        assert!(
            run.output.contains("[INFO] Process terminated by signal 9\n"),
            "{}",
            run.output
        );
    }

    /// Yields `data` once, then fails every read.
    struct BrokenReader {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "pipe broke",
                ))),
            }
        }
    }

    #[tokio::test]
    async fn test_read_error_is_reported_after_earlier_output() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_stream(
            "stderr",
            BrokenReader {
                data: Some(b"partial"),
            },
            tx,
        )
        .await;

        match rx.recv().await {
            Some(OutputEvent::Chunk(text)) => assert_eq!(text, "partial"),
            _ => panic!("expected the bytes read before the failure"),
        }
        match rx.recv().await {
            Some(OutputEvent::ReadError { stream, message }) => {
                assert_eq!(stream, "stderr");
                assert!(message.contains("pipe broke"), "{message}");
            }
            _ => panic!("expected a read error"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_is_recorded_and_fails_clean_exit() {
        let fx = fixture().await;
        let run = fx.store.create_run("scenario", "user").await.unwrap();
        fx.store
            .update_run(&run.id, RunUpdate::status(RunStatus::Running))
            .await
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(OutputEvent::Chunk("half a line".into())).unwrap();
        tx.send(OutputEvent::ReadError {
            stream: "stdout",
            message: "pipe broke".into(),
        })
        .unwrap();
        drop(tx);

        let mut at_line_start = true;
        assert!(fx.supervisor.pump(&run.id, rx, &mut at_line_start).await);

        let stored = fx.store.get_run(&run.id).await.unwrap();
        assert_eq!(
            stored.output,
            "half a line\n[ERROR] Output stream error (stdout): pipe broke\n"
        );

        use std::os::unix::process::ExitStatusExt;
        let clean = ExitStatus::from_raw(0);
        assert_eq!(exit_status(&clean, true), RunStatus::Failed);
        assert_eq!(exit_status(&clean, false), RunStatus::Success);
    }

    /// Store that fails the first `failures` terminal updates and the first
    /// `running_failures` moves to `running`.
    struct FlakyStore {
        inner: FileRunRepository,
        failures: AtomicU32,
        running_failures: AtomicU32,
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl RunRepository for FlakyStore {
        async fn create_run(&self, scenario_id: &str, user_id: &str) -> Result<Run, RunError> {
            self.inner.create_run(scenario_id, user_id).await
        }
        async fn get_run(&self, id: &str) -> Option<Run> {
            self.inner.get_run(id).await
        }
        async fn update_run(&self, id: &str, update: RunUpdate) -> Result<Run, RunError> {
            let counter = if update.status.is_terminal() {
                &self.failures
            } else {
                &self.running_failures
            };
            if take_one(counter) {
                return Err(RunError::Store(anyhow::anyhow!("disk full")));
            }
            self.inner.update_run(id, update).await
        }
        async fn append_output(&self, id: &str, chunk: &str) -> Result<usize, RunError> {
            self.inner.append_output(id, chunk).await
        }
        async fn list_runs(&self, scenario_id: &str, limit: usize) -> Vec<Run> {
            self.inner.list_runs(scenario_id, limit).await
        }
        async fn stats(&self) -> RunStats {
            self.inner.stats().await
        }
        async fn load_all(&self) -> anyhow::Result<()> {
            self.inner.load_all().await
        }
    }

    #[tokio::test]
    async fn test_finalize_retries_store_failures() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: FileRunRepository::new(dir.path()),
            failures: AtomicU32::new(2),
            running_failures: AtomicU32::new(0),
        });
        store.load_all().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(16));
        let supervisor = Arc::new(RunSupervisor::new(store.clone(), hub, "/bin/sh", 3));

        let run = store.create_run("scenario", "user").await.unwrap();
        supervisor
            .start_run(&run.id, "echo ok")
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(store.get_run(&run.id).await.unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_finalize_gives_up_after_retries() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: FileRunRepository::new(dir.path()),
            failures: AtomicU32::new(10),
            running_failures: AtomicU32::new(0),
        });
        store.load_all().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(16));
        let supervisor = Arc::new(RunSupervisor::new(store.clone(), hub, "/bin/sh", 2));

        let run = store.create_run("scenario", "user").await.unwrap();
        supervisor
            .start_run(&run.id, "true")
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(store.get_run(&run.id).await.unwrap().status, RunStatus::Running);
        assert!(!is_active(&supervisor, &run.id).await);
    }

    #[tokio::test]
    async fn test_launch_that_cannot_start_leaves_failed_run() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: FileRunRepository::new(dir.path()),
            failures: AtomicU32::new(0),
            running_failures: AtomicU32::new(1),
        });
        store.load_all().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(16));
        let supervisor = Arc::new(RunSupervisor::new(store.clone(), hub, "/bin/sh", 2));

        let err = supervisor
            .launch("scenario", "user", "echo never")
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Store(_)));

        let runs = store.list_runs("scenario", 10).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].output.starts_with("[ERROR] Execution failed: store: disk full"));
        assert!(runs[0].end_time.is_some());
        assert!(!is_active(&supervisor, &runs[0].id).await);
    }
}

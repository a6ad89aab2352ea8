//! Dashboard synchronization controller.
//!
//! One controller per signed-in session. It owns the dashboard state, and is
//! its only writer: a background task receives commands (push messages,
//! refresh requests) and fetch results, and publishes snapshots through a
//! [`watch`] channel that any number of views can subscribe to.
//!
//! Every push message triggers a full re-fetch. Fetches carry a sequence
//! number so a slow, older response never overwrites a newer one.

mod signal;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::api::DashboardSource;
use crate::auth::UserId;
use crate::channel::{ErrorHandler, MessageHandler, PushChannel};
use crate::config::ControllerConfig;
use crate::error::{CIPulseError, Result};
use crate::models::{DashboardSummary, PushEnvelope, RealtimeDashboard};
use crate::summary::{derive_summary, offline_summary};

pub use signal::RefreshSignal;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardState {
    pub realtime: Option<RealtimeDashboard>,
    /// Always `Some` once the first fetch attempt has finished.
    pub summary: Option<DashboardSummary>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_refreshing: bool,
    /// Last push-channel failure, for diagnostics only. Cleared once the channel connects again.
    pub channel_error: Option<String>,
}

enum ControlCommand {
    Push(PushEnvelope),
    ChannelError(String),
    ChannelConnected,
    Refresh { force: bool },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum FetchKind {
    Initial,
    Push,
    Refresh { force: bool },
}

enum TaskOutput {
    Fetched {
        seq: u64,
        kind: FetchKind,
        result: Result<RealtimeDashboard>,
    },
    Settled {
        seq: u64,
    },
}

pub struct DashboardController {
    commands: mpsc::UnboundedSender<ControlCommand>,
    state: watch::Receiver<DashboardState>,
    channel: Arc<PushChannel>,
    task: Option<JoinHandle<()>>,
}

impl DashboardController {
    /// Starts a session for `user`: fetches immediately, then opens the push channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        user: UserId,
        source: Arc<dyn DashboardSource>,
        channel: PushChannel,
        config: ControllerConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(DashboardState {
            loading: true,
            ..DashboardState::default()
        });
        let channel = Arc::new(channel);

        let session = Session {
            user,
            source,
            channel: Arc::clone(&channel),
            config,
            state: state_tx,
            commands: commands_rx,
            weak_commands: commands_tx.downgrade(),
            tasks: JoinSet::new(),
            next_seq: 0,
            applied_seq: 0,
            in_flight: 0,
            push_pending: false,
            refresh_seq: None,
            channel_opened: false,
        };

        Self {
            commands: commands_tx,
            state: state_rx,
            channel,
            task: Some(tokio::spawn(session.run())),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    /// Re-fetches now; `force` asks the backend to bypass its cache.
    pub fn refresh(&self, force: bool) {
        let _ = self.commands.send(ControlCommand::Refresh { force });
    }

    /// Fires one forced refresh if the signal is pending, and clears it.
    pub fn consume_refresh_signal(&self, signal: &mut RefreshSignal) -> bool {
        if !signal.take() {
            return false;
        }
        info!("Refresh requested on arrival, forcing dashboard refresh");
        self.refresh(true);
        true
    }

    pub fn push_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn subscribe_to_pipeline(&self, pipeline_id: u64) -> bool {
        self.channel.subscribe_to_pipeline(pipeline_id)
    }

    /// Ends the session: disconnects the push channel and cancels pending work.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(ControlCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Dashboard session task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        let _ = self.commands.send(ControlCommand::Shutdown);
    }
}

struct Session {
    user: UserId,
    source: Arc<dyn DashboardSource>,
    channel: Arc<PushChannel>,
    config: ControllerConfig,
    state: watch::Sender<DashboardState>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    // Push callbacks must not keep the session alive on their own.
    weak_commands: mpsc::WeakUnboundedSender<ControlCommand>,
    tasks: JoinSet<TaskOutput>,
    next_seq: u64,
    applied_seq: u64,
    in_flight: usize,
    push_pending: bool,
    refresh_seq: Option<u64>,
    channel_opened: bool,
}

impl Session {
    async fn run(mut self) {
        info!("Starting dashboard session for user {}", self.user);
        self.start_fetch(FetchKind::Initial);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(ControlCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command),
                },
                Some(joined) = self.tasks.join_next() => match joined {
                    Ok(output) => self.handle_output(output),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!("Dashboard task failed: {e}"),
                },
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Push(envelope) => {
                debug!("Push message {} received", envelope.kind);
                if self.in_flight > 0 {
                    self.push_pending = true;
                } else {
                    self.start_fetch(FetchKind::Push);
                }
            }
            ControlCommand::Refresh { force } => self.start_fetch(FetchKind::Refresh { force }),
            ControlCommand::ChannelError(message) => {
                self.state
                    .send_modify(|state| state.channel_error = Some(message));
            }
            ControlCommand::ChannelConnected => {
                self.state.send_if_modified(|state| state.channel_error.take().is_some());
            }
            ControlCommand::Shutdown => {}
        }
    }

    fn start_fetch(&mut self, kind: FetchKind) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.in_flight += 1;

        match kind {
            FetchKind::Initial => self.state.send_modify(|state| state.loading = true),
            FetchKind::Refresh { .. } => {
                self.refresh_seq = Some(seq);
                self.state.send_modify(|state| {
                    state.is_refreshing = true;
                    if state.realtime.is_none() {
                        state.loading = true;
                    }
                });
            }
            FetchKind::Push => {}
        }

        debug!("Starting {kind:?} fetch #{seq}");
        let source = Arc::clone(&self.source);
        let user = self.user.clone();
        self.tasks.spawn(async move {
            let result = match kind {
                FetchKind::Refresh { force: true } => source.force_refresh_dashboard(&user).await,
                _ => source.fetch_realtime_dashboard(&user).await,
            };
            TaskOutput::Fetched { seq, kind, result }
        });
    }

    fn handle_output(&mut self, output: TaskOutput) {
        match output {
            TaskOutput::Fetched { seq, kind, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);

                if seq < self.applied_seq {
                    debug!("Discarding fetch #{seq}, #{} already applied", self.applied_seq);
                } else {
                    self.applied_seq = seq;
                    self.apply(result);
                }

                if matches!(kind, FetchKind::Refresh { .. }) && self.refresh_seq == Some(seq) {
                    let delay = self.config.refresh_settle_delay;
                    self.tasks.spawn(async move {
                        tokio::time::sleep(delay).await;
                        TaskOutput::Settled { seq }
                    });
                }

                if !self.channel_opened {
                    self.open_channel();
                }

                if self.in_flight == 0 && self.push_pending {
                    self.push_pending = false;
                    self.start_fetch(FetchKind::Push);
                }
            }
            TaskOutput::Settled { seq } => {
                if self.refresh_seq == Some(seq) {
                    self.refresh_seq = None;
                    self.state.send_modify(|state| state.is_refreshing = false);
                }
            }
        }
    }

    fn apply(&self, result: Result<RealtimeDashboard>) {
        let now = Utc::now();
        match result {
            Ok(raw) => {
                let summary = derive_summary(&raw);
                self.state.send_modify(|state| {
                    state.realtime = Some(raw);
                    state.summary = Some(summary);
                    state.error = None;
                    state.loading = false;
                    state.last_updated = Some(now);
                });
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!(
                        "Dashboard fetch for user {} failed, showing offline summary: {e}",
                        self.user
                    );
                } else {
                    error!("Failed to fetch dashboard for user {}: {e}", self.user);
                }
                let message = format!("Failed to fetch dashboard data: {e}");
                self.state.send_modify(|state| {
                    state.realtime = None;
                    state.summary = Some(offline_summary(&now.to_rfc3339()));
                    state.error = Some(message);
                    state.loading = false;
                });
            }
        }
    }

    fn open_channel(&mut self) {
        self.channel_opened = true;

        let push_tx = self.weak_commands.clone();
        let on_message: MessageHandler = Arc::new(move |envelope: PushEnvelope| {
            if let Some(tx) = push_tx.upgrade() {
                let _ = tx.send(ControlCommand::Push(envelope));
            }
        });

        let error_tx = self.weak_commands.clone();
        let on_error: ErrorHandler = Arc::new(move |e: &CIPulseError| {
            if let Some(tx) = error_tx.upgrade() {
                let _ = tx.send(ControlCommand::ChannelError(e.to_string()));
            }
        });

        let connected_tx = self.weak_commands.clone();
        self.channel.set_connected_handler(Arc::new(move || {
            if let Some(tx) = connected_tx.upgrade() {
                let _ = tx.send(ControlCommand::ChannelConnected);
            }
        }));

        self.channel.connect(on_message, Some(on_error));
    }

    fn teardown(&mut self) {
        self.channel.disconnect();
        self.tasks.abort_all();
        info!("Dashboard session for user {} ended", self.user);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    use super::*;
    use crate::api::ApiClient;
    use crate::channel::testing::{FakeBroker, ScriptedConnector};
    use crate::config::{ChannelConfig, ClientConfig, DEFAULT_API_URL};
    use crate::models::{Conclusion, RunStatus, SummaryStatus, WorkflowRun};

    struct Step {
        result: Result<RealtimeDashboard>,
        gate: Option<oneshot::Receiver<()>>,
    }

    #[derive(Clone, Default)]
    struct FakeSource {
        script: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakeSource {
        fn then_ok(&self, raw: RealtimeDashboard) {
            self.script.lock().unwrap().push_back(Step {
                result: Ok(raw),
                gate: None,
            });
        }

        fn then_err(&self, err: CIPulseError) {
            self.script.lock().unwrap().push_back(Step {
                result: Err(err),
                gate: None,
            });
        }

        fn then_gated(&self, raw: RealtimeDashboard) -> oneshot::Sender<()> {
            let (release, gate) = oneshot::channel();
            self.script.lock().unwrap().push_back(Step {
                result: Ok(raw),
                gate: Some(gate),
            });
            release
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        async fn next(&self, call: &'static str) -> Result<RealtimeDashboard> {
            self.calls.lock().unwrap().push(call);
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step { result, gate }) => {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    result
                }
                None => Err(CIPulseError::Http { status: 503 }),
            }
        }
    }

    #[async_trait]
    impl DashboardSource for FakeSource {
        async fn fetch_realtime_dashboard(&self, _user: &UserId) -> Result<RealtimeDashboard> {
            self.next("fetch").await
        }

        async fn force_refresh_dashboard(&self, _user: &UserId) -> Result<RealtimeDashboard> {
            self.next("force").await
        }
    }

    fn snapshot(count: u64) -> RealtimeDashboard {
        let workflows: Vec<_> = (1..=count)
            .map(|id| WorkflowRun {
                id,
                name: format!("CI #{id}"),
                status: RunStatus::Completed,
                conclusion: Some(Conclusion::Success),
                created_at: format!("2025-03-01T10:0{id}:00Z"),
                repository: "acme/api".to_string(),
            })
            .collect();
        RealtimeDashboard {
            total_workflows: workflows.len(),
            workflows,
            last_updated: "2025-03-01T10:10:00Z".to_string(),
            selected_repositories: None,
            error: None,
        }
    }

    fn user() -> UserId {
        "user-1".parse().unwrap()
    }

    fn channel(connector: ScriptedConnector) -> PushChannel {
        let api = ClientConfig::new(DEFAULT_API_URL).unwrap().api_url;
        PushChannel::new(
            Arc::new(connector),
            ChannelConfig::from_api_url(&api).unwrap(),
        )
    }

    fn start(source: &FakeSource, connector: ScriptedConnector) -> DashboardController {
        DashboardController::start(
            user(),
            Arc::new(source.clone()),
            channel(connector),
            ControllerConfig::default(),
        )
    }

    async fn wait_state(
        rx: &mut watch::Receiver<DashboardState>,
        predicate: impl FnMut(&DashboardState) -> bool,
    ) -> DashboardState {
        tokio::time::timeout(Duration::from_secs(30), rx.wait_for(predicate))
            .await
            .expect("state never matched")
            .expect("controller dropped")
            .clone()
    }

    async fn wait_calls(source: &FakeSource, count: usize) {
        for _ in 0..1000 {
            if source.calls().len() >= count {
                return;
            }
            sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {count} fetches, saw {:?}", source.calls());
    }

    async fn wait_connected(controller: &DashboardController) {
        for _ in 0..1000 {
            if controller.push_connected() {
                return;
            }
            sleep(Duration::from_millis(1)).await;
        }
        panic!("push channel never connected");
    }

    fn total_builds(state: &DashboardState) -> Option<usize> {
        state.summary.as_ref().map(|s| s.overview.total_builds)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_shows_loading_then_summary() {
        let source = FakeSource::default();
        let release = source.then_gated(snapshot(2));
        let controller = start(&source, ScriptedConnector::default());
        let mut states = controller.subscribe();

        wait_calls(&source, 1).await;
        let before = controller.snapshot();
        assert!(before.loading);
        assert!(before.summary.is_none());

        release.send(()).unwrap();
        let after = wait_state(&mut states, |s| s.summary.is_some()).await;

        assert!(!after.loading);
        assert!(after.error.is_none());
        assert!(after.last_updated.is_some());
        assert_eq!(total_builds(&after), Some(2));
        assert_eq!(after.realtime.map(|r| r.workflows.len()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_message_refetches_without_loading_flicker() {
        let (link, broker) = FakeBroker::accepting();
        let source = FakeSource::default();
        source.then_ok(snapshot(2));
        let release = source.then_gated(snapshot(3));
        let controller = start(&source, ScriptedConnector::with_links(vec![link]));
        let mut states = controller.subscribe();

        let first = wait_state(&mut states, |s| s.summary.is_some()).await;
        assert_eq!(total_builds(&first), Some(2));
        assert!(!first.loading);

        let saw_loading = Arc::new(Mutex::new(false));
        let mut observer = controller.subscribe();
        let flag = Arc::clone(&saw_loading);
        let watcher = tokio::spawn(async move {
            while observer.changed().await.is_ok() {
                if observer.borrow_and_update().loading {
                    *flag.lock().unwrap() = true;
                }
            }
        });

        wait_connected(&controller).await;
        broker.publish(
            "/topic/dashboard",
            r#"{"type":"workflow_update","timestamp":"2025-03-01T10:11:00Z"}"#,
        );
        wait_calls(&source, 2).await;

        let during = controller.snapshot();
        assert!(!during.loading);
        assert_eq!(total_builds(&during), Some(2));

        release.send(()).unwrap();
        let updated = wait_state(&mut states, |s| total_builds(s) == Some(3)).await;
        assert!(!updated.loading);
        assert_eq!(source.calls(), vec!["fetch", "fetch"]);

        controller.shutdown().await;
        watcher.await.unwrap();
        assert!(!*saw_loading.lock().unwrap());
    }

    #[tokio::test]
    async fn test_network_failure_yields_offline_summary() {
        let unreachable =
            ApiClient::new(&ClientConfig::new("http://127.0.0.1:1").unwrap()).unwrap();
        let controller = DashboardController::start(
            user(),
            Arc::new(unreachable),
            channel(ScriptedConnector::default()),
            ControllerConfig::default(),
        );
        let mut states = controller.subscribe();

        let state = wait_state(&mut states, |s| s.summary.is_some()).await;

        let summary = state.summary.unwrap();
        assert_eq!(summary.status, SummaryStatus::Offline);
        assert_eq!(summary.overview.total_success_rate, 0);
        assert_eq!(summary.overview.total_builds, 0);
        assert!(summary.pipelines.is_empty());
        assert!(state.error.unwrap().contains("Network error"));
        assert!(!state.loading);
        assert!(state.realtime.is_none());

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_replaces_stale_summary() {
        let source = FakeSource::default();
        source.then_ok(snapshot(2));
        source.then_err(CIPulseError::Http { status: 500 });
        let controller = start(&source, ScriptedConnector::default());
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| total_builds(s) == Some(2)).await;

        controller.refresh(false);
        let state = wait_state(&mut states, |s| s.error.is_some()).await;

        assert_eq!(state.summary.unwrap().status, SummaryStatus::Offline);
        assert!(state.error.unwrap().contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_holds_refreshing_for_settle_delay() {
        let source = FakeSource::default();
        source.then_ok(snapshot(1));
        source.then_ok(snapshot(4));
        let controller = start(&source, ScriptedConnector::default());
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| total_builds(s) == Some(1)).await;

        controller.refresh(true);
        let refreshed = wait_state(&mut states, |s| total_builds(s) == Some(4)).await;
        assert!(refreshed.is_refreshing);
        assert!(!refreshed.loading);
        assert_eq!(source.calls(), vec!["fetch", "force"]);

        sleep(Duration::from_millis(400)).await;
        assert!(controller.snapshot().is_refreshing);

        sleep(Duration::from_millis(150)).await;
        assert!(!controller.snapshot().is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_without_prior_data_shows_loading() {
        let source = FakeSource::default();
        source.then_err(CIPulseError::Http { status: 502 });
        let release = source.then_gated(snapshot(1));
        let controller = start(&source, ScriptedConnector::default());
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| s.error.is_some()).await;

        controller.refresh(true);
        wait_calls(&source, 2).await;
        let during = controller.snapshot();
        assert!(during.loading);
        assert!(during.is_refreshing);

        release.send(()).unwrap();
        let after = wait_state(&mut states, |s| total_builds(s) == Some(1)).await;
        assert!(!after.loading);
        assert!(after.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_fetch_never_overwrites_newer_result() {
        let (link, broker) = FakeBroker::accepting();
        let source = FakeSource::default();
        source.then_ok(snapshot(1));
        let release_push = source.then_gated(snapshot(2));
        source.then_ok(snapshot(5));
        let controller = start(&source, ScriptedConnector::with_links(vec![link]));
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| total_builds(s) == Some(1)).await;
        wait_connected(&controller).await;

        broker.publish("/topic/dashboard", r#"{"type":"tick","timestamp":"t"}"#);
        wait_calls(&source, 2).await;
        controller.refresh(true);
        wait_state(&mut states, |s| total_builds(s) == Some(5)).await;

        release_push.send(()).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(total_builds(&controller.snapshot()), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_bursts_are_coalesced() {
        let (link, broker) = FakeBroker::accepting();
        let source = FakeSource::default();
        source.then_ok(snapshot(1));
        let release = source.then_gated(snapshot(2));
        source.then_ok(snapshot(3));
        let controller = start(&source, ScriptedConnector::with_links(vec![link]));
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| total_builds(s) == Some(1)).await;
        wait_connected(&controller).await;

        for _ in 0..4 {
            broker.publish("/topic/dashboard", r#"{"type":"tick","timestamp":"t"}"#);
        }
        wait_calls(&source, 2).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls().len(), 2);

        release.send(()).unwrap();
        wait_state(&mut states, |s| total_builds(s) == Some(3)).await;
        sleep(Duration::from_millis(10)).await;

        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_errors_are_diagnostic_only() {
        let source = FakeSource::default();
        source.then_ok(snapshot(2));
        let controller = start(&source, ScriptedConnector::default());
        let mut states = controller.subscribe();

        let state = wait_state(&mut states, |s| s.channel_error.is_some()).await;

        assert!(state.error.is_none());
        assert_eq!(total_builds(&state), Some(2));
        assert!(state.channel_error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_clears_after_reconnect() {
        let connector = ScriptedConnector::default();
        let source = FakeSource::default();
        source.then_ok(snapshot(2));
        let controller = start(&source, connector.clone());
        let mut states = controller.subscribe();

        wait_state(&mut states, |s| s.channel_error.is_some()).await;
        let (link, _broker) = FakeBroker::accepting();
        connector.add_link(link);

        let state = wait_state(&mut states, |s| s.channel_error.is_none()).await;
        assert!(controller.push_connected());
        assert_eq!(total_builds(&state), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_signal_fires_once() {
        let source = FakeSource::default();
        source.then_ok(snapshot(1));
        source.then_ok(snapshot(2));
        let controller = start(&source, ScriptedConnector::default());
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| total_builds(s) == Some(1)).await;

        let mut signal = RefreshSignal::from_query("?refresh=true");
        assert!(controller.consume_refresh_signal(&mut signal));
        assert!(!controller.consume_refresh_signal(&mut signal));
        wait_state(&mut states, |s| total_builds(s) == Some(2)).await;
        sleep(Duration::from_secs(1)).await;

        assert_eq!(source.calls(), vec!["fetch", "force"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_channel_and_timers() {
        let connector = ScriptedConnector::default();
        let source = FakeSource::default();
        source.then_ok(snapshot(1));
        let controller = start(&source, connector.clone());
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| s.channel_error.is_some()).await;

        controller.shutdown().await;
        let opens = connector.opens().len();
        sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.opens().len(), opens);
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_controller_ends_session() {
        let connector = ScriptedConnector::default();
        let source = FakeSource::default();
        source.then_ok(snapshot(1));
        let controller = start(&source, connector.clone());
        let mut states = controller.subscribe();
        wait_state(&mut states, |s| s.summary.is_some()).await;

        drop(controller);
        sleep(Duration::from_millis(10)).await;
        let opens = connector.opens().len();
        sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.opens().len(), opens);
        assert!(states.has_changed().is_err());
    }
}

// Aquaview Bridge - Hosted dashboard service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dashboard event loop
//!
//! [`App`] owns the aggregator, the control store, the countdown and the
//! command publisher, and drives all of them from a single task. Nothing
//! in the core is shared across threads: HTTP handlers talk to the loop
//! through an [`AppHandle`], sending commands over an mpsc channel and
//! reading the latest snapshots from watch channels.

use std::future::Future;
use std::time::Duration;

use aquaview::{
    format_time_left, ChannelEvent, CommandError, CommandOutcome, CommandPublisher, ControlState,
    ControlStateStore, CountdownProcess, DashboardConfig, DataPoint, HealthCheck, HealthMonitor,
    HealthStatus, MessageChannel, Reconcile, RemoteApply, ReplicaStore, SyncStatus,
    TelemetryAggregator, TickOutcome, TimerHandle, TimerPhase, HOUR_TOPIC, MODE_TOPIC,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, SubmitError};
use crate::metrics;
use crate::ticker::Ticker;

/// Pending commands before senders wait
const COMMAND_QUEUE: usize = 32;

/// Ticks buffered between the ticker task and the loop
const TICK_QUEUE: usize = 4;

/// Which control a command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Hour,
    Mode,
}

impl CommandKind {
    /// Topic the command is published on
    pub fn topic(&self) -> &'static str {
        match self {
            CommandKind::Hour => HOUR_TOPIC,
            CommandKind::Mode => MODE_TOPIC,
        }
    }
}

/// Operator command with its reply slot
#[derive(Debug)]
pub struct Command {
    pub kind: CommandKind,
    pub value: String,
    pub reply: oneshot::Sender<std::result::Result<CommandOutcome, CommandError>>,
}

/// Both windows and the link state
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub link: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    pub loading: bool,
    pub short: Vec<DataPoint>,
    pub long: Vec<DataPoint>,
    pub accepted: u64,
    pub rejected: u64,
    pub replayed: u64,
}

impl TelemetrySnapshot {
    /// Copy the aggregator's current view
    pub fn capture<C, H>(aggregator: &TelemetryAggregator<C, H>) -> Self
    where
        C: MessageChannel,
        H: ReplicaStore,
    {
        let link = aggregator.link_status();
        let stats = aggregator.stats();
        Self {
            link: link.label(),
            fault: match link {
                aquaview::LinkStatus::Faulted { reason } => Some(reason.clone()),
                _ => None,
            },
            loading: aggregator.is_loading(),
            short: aggregator.short_window().to_vec(),
            long: aggregator.long_window().to_vec(),
            accepted: stats.accepted,
            rejected: stats.rejected,
            replayed: stats.replayed,
        }
    }
}

/// Control state as shown on the dashboard
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSnapshot {
    #[serde(flatten)]
    pub state: ControlState,
    pub time_left_display: Option<String>,
    pub timer_active: bool,
    pub phase: &'static str,
    pub sync: SyncStatus,
    pub completions: u64,
}

impl ControlSnapshot {
    /// Copy the store and countdown state
    pub fn capture<S: ReplicaStore>(
        store: &ControlStateStore<S>,
        countdown: &CountdownProcess,
    ) -> Self {
        let state = store.snapshot();
        Self {
            time_left_display: state.time_left.map(format_time_left),
            state,
            timer_active: countdown.is_timer_active(),
            phase: phase_label(countdown.phase()),
            sync: store.sync_status().clone(),
            completions: countdown.completions(),
        }
    }
}

fn phase_label(phase: TimerPhase) -> &'static str {
    match phase {
        TimerPhase::Idle => "idle",
        TimerPhase::Running => "running",
        TimerPhase::Expired => "expired",
    }
}

/// Aggregate health
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub operational: bool,
    pub checks: Vec<HealthCheck>,
}

impl HealthSnapshot {
    /// Copy the monitor's latest checks
    pub fn capture(monitor: &HealthMonitor) -> Self {
        Self {
            status: monitor.status(),
            operational: monitor.is_operational(),
            checks: monitor.checks().to_vec(),
        }
    }
}

/// Cloneable access to a running [`App`]
#[derive(Debug, Clone)]
pub struct AppHandle {
    commands: mpsc::Sender<Command>,
    telemetry: watch::Receiver<TelemetrySnapshot>,
    control: watch::Receiver<ControlSnapshot>,
    health: watch::Receiver<HealthSnapshot>,
}

impl AppHandle {
    /// Assemble a handle from its channels
    pub fn new(
        commands: mpsc::Sender<Command>,
        telemetry: watch::Receiver<TelemetrySnapshot>,
        control: watch::Receiver<ControlSnapshot>,
        health: watch::Receiver<HealthSnapshot>,
    ) -> Self {
        Self {
            commands,
            telemetry,
            control,
            health,
        }
    }

    /// Submit a command and wait for its outcome
    pub async fn submit(
        &self,
        kind: CommandKind,
        value: impl Into<String>,
    ) -> std::result::Result<CommandOutcome, SubmitError> {
        let (reply, outcome) = oneshot::channel();
        let command = Command {
            kind,
            value: value.into(),
            reply,
        };
        self.commands
            .send(command)
            .await
            .map_err(|_| SubmitError::Stopped)?;
        Ok(outcome.await.map_err(|_| SubmitError::Stopped)??)
    }

    /// Latest telemetry
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.borrow().clone()
    }

    /// Latest control state
    pub fn control(&self) -> ControlSnapshot {
        self.control.borrow().clone()
    }

    /// Latest health
    pub fn health(&self) -> HealthSnapshot {
        self.health.borrow().clone()
    }
}

/// Single-task dashboard runtime
pub struct App<C, H, S>
where
    C: MessageChannel + Clone,
    H: ReplicaStore,
    S: ReplicaStore,
{
    aggregator: TelemetryAggregator<C, H>,
    store: ControlStateStore<S>,
    countdown: CountdownProcess,
    publisher: CommandPublisher<C>,
    ticker: Ticker,
    events: mpsc::Receiver<ChannelEvent>,
    commands: mpsc::Receiver<Command>,
    ticks: mpsc::Receiver<TimerHandle>,
    store_poll: Duration,
    telemetry_tx: watch::Sender<TelemetrySnapshot>,
    control_tx: watch::Sender<ControlSnapshot>,
    health_tx: watch::Sender<HealthSnapshot>,
}

impl<C, H, S> App<C, H, S>
where
    C: MessageChannel + Clone,
    H: ReplicaStore,
    S: ReplicaStore,
{
    /// Open the control store and wire the loop
    ///
    /// `history` serves the startup replay; `replica` holds the control
    /// record and is polled every `store_poll`.
    pub fn new(
        channel: C,
        history: H,
        replica: S,
        events: mpsc::Receiver<ChannelEvent>,
        config: &DashboardConfig,
        store_poll: Duration,
    ) -> Result<(Self, AppHandle)> {
        let mut store = ControlStateStore::open(replica, config)?;
        store.on_remote_change(|state| {
            info!(
                hour = %state.hour,
                mode = %state.mode,
                time_left = ?state.time_left,
                "control state replaced by remote writer"
            );
        });

        let aggregator = TelemetryAggregator::new(channel.clone(), history, config);
        let publisher = CommandPublisher::new(channel);
        let countdown = CountdownProcess::new();

        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (ticks_tx, ticks) = mpsc::channel(TICK_QUEUE);
        let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySnapshot::capture(&aggregator));
        let (control_tx, control_rx) = watch::channel(ControlSnapshot::capture(&store, &countdown));
        let mut monitor = HealthMonitor::new();
        monitor.observe(&aggregator);
        monitor.observe(&store);
        let (health_tx, health_rx) = watch::channel(HealthSnapshot::capture(&monitor));

        let app = Self {
            aggregator,
            store,
            countdown,
            publisher,
            ticker: Ticker::new(config.tick_period, ticks_tx),
            events,
            commands,
            ticks,
            store_poll,
            telemetry_tx,
            control_tx,
            health_tx,
        };
        let handle = AppHandle::new(commands_tx, telemetry_rx, control_rx, health_rx);
        Ok((app, handle))
    }

    /// Subscribe, replay history and resume any stored countdown
    pub fn start(&mut self) {
        self.aggregator.start();
        self.reconcile();
        self.publish_snapshots();
        info!(
            replayed = self.aggregator.stats().replayed,
            "dashboard started"
        );
    }

    /// Unsubscribe and stop ticking; windows and state are kept
    pub fn stop(&mut self) {
        self.aggregator.shutdown();
        self.countdown.cancel();
        self.ticker.cancel();
        self.publish_snapshots();
        info!("dashboard stopped");
    }

    /// Run until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.start();

        let mut poll = tokio::time::interval(self.store_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let retry = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(retry);
        tokio::pin!(shutdown);
        let mut armed: Option<std::time::Instant> = None;

        loop {
            // Re-arm only when the schedule moves so other wakeups do not
            // push the retry back
            let next = self.store.next_retry_at();
            if next != armed {
                if let Some(at) = next {
                    let delay = at.saturating_duration_since(std::time::Instant::now());
                    retry.as_mut().reset(tokio::time::Instant::now() + delay);
                }
                armed = next;
            }

            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(command) = self.commands.recv() => self.handle_command(command),
                Some(handle) = self.ticks.recv() => self.handle_tick(handle),
                _ = poll.tick() => self.poll_replica(),
                _ = &mut retry, if armed.is_some() => {
                    if let Some(at) = armed {
                        self.retry_store(at);
                    }
                }
                else => break,
            }

            self.publish_snapshots();
        }

        self.stop();
    }

    fn handle_event(&mut self, event: ChannelEvent) {
        if let Some(sample) = self.aggregator.handle_event(event) {
            metrics::record_sensor_value(sample.kind.field_name(), sample.value);
        }
    }

    fn handle_command(&mut self, command: Command) {
        let Command { kind, value, reply } = command;
        let result = match kind {
            CommandKind::Hour => {
                self.publisher
                    .publish_hour(&value, &mut self.store, &mut self.countdown)
            }
            CommandKind::Mode => self.publisher.publish_mode(&value, &mut self.store),
        };

        let label = match &result {
            Ok(CommandOutcome::Published { timer, .. }) => {
                if let Some(handle) = timer {
                    self.ticker.schedule(*handle);
                }
                info!(topic = kind.topic(), value = %value.trim(), "command published");
                "published"
            }
            Ok(CommandOutcome::Ignored) => "ignored",
            Err(CommandError::InvalidHour(_)) => "invalid",
            Err(e) => {
                warn!(topic = kind.topic(), error = %e, "command failed");
                "failed"
            }
        };
        metrics::record_command(kind.topic(), label);

        if reply.send(result).is_err() {
            debug!("command reply dropped by caller");
        }
    }

    fn handle_tick(&mut self, handle: TimerHandle) {
        match self.countdown.tick(handle, &mut self.store) {
            TickOutcome::Remaining(_) => {}
            TickOutcome::Completed => {
                info!("timer completed");
                self.ticker.cancel();
            }
            TickOutcome::Halted | TickOutcome::Stale => {
                // A queued tick of a replaced chain must not stop the new one
                if self.ticker.active() == Some(handle) {
                    self.ticker.cancel();
                }
            }
        }
    }

    fn poll_replica(&mut self) {
        match self.store.sync() {
            Ok(RemoteApply::Replaced) => self.reconcile(),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "replica poll failed"),
        }
    }

    fn reconcile(&mut self) {
        match self.countdown.reconcile(&self.store) {
            Reconcile::Resumed(handle) => self.ticker.schedule(handle),
            Reconcile::Stopped => self.ticker.cancel(),
            Reconcile::Expired => {
                info!("timer completed");
                self.ticker.cancel();
            }
            Reconcile::Unchanged => {}
        }
    }

    fn retry_store(&mut self, at: std::time::Instant) {
        match self.store.retry_pending(at) {
            Some(Ok(())) => info!("control state re-synced"),
            Some(Err(e)) => warn!(status = %self.store.sync_status(), error = %e, "control state retry failed"),
            None => {}
        }
    }

    fn publish_snapshots(&mut self) {
        let mut monitor = HealthMonitor::new();
        monitor.observe(&self.aggregator);
        monitor.observe(&self.store);

        metrics::update_telemetry(&self.aggregator.stats(), self.aggregator.link_status());
        metrics::update_control(
            self.store.get(),
            self.store.sync_status(),
            self.countdown.completions(),
        );

        self.telemetry_tx
            .send_replace(TelemetrySnapshot::capture(&self.aggregator));
        self.control_tx
            .send_replace(ControlSnapshot::capture(&self.store, &self.countdown));
        self.health_tx.send_replace(HealthSnapshot::capture(&monitor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquaview::{MemoryChannel, MemoryStore};
    use serde_json::json;

    struct Harness {
        app: App<MemoryChannel, MemoryStore, MemoryStore>,
        handle: AppHandle,
        channel: MemoryChannel,
        replica: MemoryStore,
        events: mpsc::Sender<ChannelEvent>,
    }

    fn harness() -> Harness {
        let channel = MemoryChannel::new();
        let replica = MemoryStore::new();
        let (events, events_rx) = mpsc::channel(16);
        let (app, handle) = App::new(
            channel.clone(),
            MemoryStore::new(),
            replica.clone(),
            events_rx,
            &DashboardConfig::default(),
            Duration::from_millis(250),
        )
        .unwrap();
        Harness {
            app,
            handle,
            channel,
            replica,
            events,
        }
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_command_counts_down() {
        let Harness {
            app,
            handle,
            channel,
            ..
        } = harness();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            let outcome = handle.submit(CommandKind::Hour, " 1 ").await.unwrap();
            assert!(matches!(outcome, CommandOutcome::Published { topic: "hour", .. }));

            settle(Duration::from_millis(3500)).await;
            let control = handle.control();
            assert_eq!(control.state.hour, "1");
            assert_eq!(control.state.time_left, Some(3597));
            assert_eq!(control.time_left_display.as_deref(), Some("00:59:57"));
            assert!(control.timer_active);
            assert_eq!(control.phase, "running");
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );

        assert_eq!(channel.published(), vec![("hour".to_string(), b"1".to_vec())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_and_blank_commands() {
        let Harness {
            app,
            handle,
            channel,
            replica,
            ..
        } = harness();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            let err = handle.submit(CommandKind::Hour, "abc").await.unwrap_err();
            assert!(matches!(
                err,
                SubmitError::Command(CommandError::InvalidHour(_))
            ));
            let outcome = handle.submit(CommandKind::Mode, "  ").await.unwrap();
            assert_eq!(outcome, CommandOutcome::Ignored);
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );

        assert!(channel.published().is_empty());
        assert_eq!(replica.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_clear_stops_countdown() {
        let Harness {
            app,
            handle,
            replica,
            ..
        } = harness();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            handle.submit(CommandKind::Hour, "2").await.unwrap();
            settle(Duration::from_millis(1500)).await;
            assert!(handle.control().timer_active);

            replica.remote_write(
                "controlState",
                json!({ "hour": "2", "mode": "", "timeLeft": null }),
            );
            settle(Duration::from_secs(2)).await;

            let control = handle.control();
            assert_eq!(control.state.time_left, None);
            assert!(!control.timer_active);
            assert_eq!(control.phase, "idle");
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_countdown_resumes_and_expires() {
        let Harness {
            app,
            handle,
            replica,
            ..
        } = harness();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            replica.remote_write(
                "controlState",
                json!({ "hour": "1", "mode": "2", "timeLeft": 3 }),
            );
            settle(Duration::from_secs(10)).await;

            let control = handle.control();
            assert_eq!(control.state.time_left, Some(0));
            assert_eq!(control.phase, "expired");
            assert_eq!(control.completions, 1);
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_events_reach_telemetry() {
        let Harness {
            app,
            handle,
            events,
            ..
        } = harness();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            assert!(handle.telemetry().loading);
            assert_eq!(handle.health().status, HealthStatus::Degraded);

            events.send(ChannelEvent::Connected).await.unwrap();
            events
                .send(ChannelEvent::message("sensor/tds", b"312.5".to_vec()))
                .await
                .unwrap();
            events
                .send(ChannelEvent::message("sensor/ph", b"7".to_vec()))
                .await
                .unwrap();
            settle(Duration::from_millis(10)).await;

            let telemetry = handle.telemetry();
            assert_eq!(telemetry.link, "live");
            assert!(!telemetry.loading);
            assert_eq!(telemetry.short.len(), 1);
            assert_eq!(telemetry.short[0].tds, Some(312.5));
            assert_eq!(telemetry.rejected, 1);
            assert_eq!(handle.health().status, HealthStatus::Healthy);
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_retried() {
        let Harness {
            app,
            handle,
            channel,
            replica,
            ..
        } = harness();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            replica.fail_next_writes(1);
            let outcome = handle.submit(CommandKind::Mode, "3").await.unwrap();
            assert!(matches!(outcome, CommandOutcome::Published { topic: "mode", .. }));
            assert!(matches!(
                handle.control().sync,
                SyncStatus::Pending { .. }
            ));
            assert!(replica.read("controlState").unwrap().is_none());

            settle(Duration::from_secs(5)).await;
            assert_eq!(handle.control().sync, SyncStatus::InSync);
            assert_eq!(
                replica.read("controlState").unwrap().unwrap()["mode"],
                json!("3")
            );
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );

        // Device and replica agree once the retry lands
        assert_eq!(channel.published(), vec![("mode".to_string(), b"3".to_vec())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_replica_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aquaview.json");
        std::fs::write(
            &path,
            json!({
                "sensor": { "tds": [{ "time": "07:00", "tds": 280 }] },
                "controlState": { "hour": "1", "mode": "2", "timeLeft": 5 }
            })
            .to_string(),
        )
        .unwrap();

        let (_events, events_rx) = mpsc::channel(4);
        let (app, handle) = App::new(
            MemoryChannel::new(),
            aquaview::FileStore::open(&path).unwrap(),
            aquaview::FileStore::open(&path).unwrap(),
            events_rx,
            &DashboardConfig::default(),
            Duration::from_millis(250),
        )
        .unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let script = async move {
            settle(Duration::from_millis(2500)).await;
            let telemetry = handle.telemetry();
            assert_eq!(telemetry.replayed, 1);
            assert_eq!(telemetry.long[0].tds, Some(280.0));

            let control = handle.control();
            assert_eq!(control.state.time_left, Some(3));
            assert!(control.timer_active);
            let _ = stop_tx.send(());
        };

        tokio::join!(
            app.run(async {
                let _ = stop_rx.await;
            }),
            script
        );

        // The countdown persisted without clobbering history
        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored["controlState"]["timeLeft"], json!(3));
        assert_eq!(stored["sensor"]["tds"][0]["tds"], json!(280));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unsubscribes() {
        let Harness {
            mut app, channel, ..
        } = harness();
        app.start();
        assert_eq!(channel.subscriptions().len(), 3);
        app.stop();
        assert!(channel.subscriptions().is_empty());
    }
}

// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Operator commands
//!
//! Each accepted command is first written to the control state (and so
//! to the replica), then published to the device. A failed replica write
//! does not hold the command back: the store keeps the new value and
//! retries it, reporting [`SyncStatus::Pending`](crate::SyncStatus) until
//! the replica catches up. The countdown for an hour command starts once
//! the publish succeeded.

use crate::channel::MessageChannel;
use crate::control::{ControlPatch, ControlStateStore};
use crate::countdown::{CountdownProcess, TimerHandle};
use crate::error::CommandError;
use crate::protocol::{HOUR_TOPIC, MODE_TOPIC};
use crate::replica::ReplicaStore;

/// What a command did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Empty input; nothing written or published
    Ignored,
    /// Written and published
    Published {
        topic: &'static str,
        /// New countdown chain for hour commands
        timer: Option<TimerHandle>,
    },
}

/// Sends operator commands to the device
#[derive(Debug)]
pub struct CommandPublisher<C: MessageChannel> {
    channel: C,
    sent: u64,
}

impl<C: MessageChannel> CommandPublisher<C> {
    /// Create a publisher on `channel`
    pub fn new(channel: C) -> Self {
        Self { channel, sent: 0 }
    }

    /// Set the runtime hour and restart the countdown
    ///
    /// `raw` must be a positive whole number of hours once trimmed.
    pub fn publish_hour<S: ReplicaStore>(
        &mut self,
        raw: &str,
        store: &mut ControlStateStore<S>,
        countdown: &mut CountdownProcess,
    ) -> Result<CommandOutcome, CommandError> {
        let value = raw.trim();
        if value.is_empty() {
            return Ok(CommandOutcome::Ignored);
        }

        let hours = match value.parse::<u32>() {
            Ok(hours) if hours > 0 => hours,
            _ => return Err(CommandError::InvalidHour(value.to_string())),
        };

        persist(store, ControlPatch::new().hour(value));
        self.send(HOUR_TOPIC, value)?;

        let timer = countdown.start(hours, store);
        Ok(CommandOutcome::Published {
            topic: HOUR_TOPIC,
            timer: Some(timer),
        })
    }

    /// Set the device mode
    pub fn publish_mode<S: ReplicaStore>(
        &mut self,
        raw: &str,
        store: &mut ControlStateStore<S>,
    ) -> Result<CommandOutcome, CommandError> {
        let value = raw.trim();
        if value.is_empty() {
            return Ok(CommandOutcome::Ignored);
        }

        persist(store, ControlPatch::new().mode(value));
        self.send(MODE_TOPIC, value)?;

        Ok(CommandOutcome::Published {
            topic: MODE_TOPIC,
            timer: None,
        })
    }

    fn send(&mut self, topic: &str, value: &str) -> Result<(), CommandError> {
        self.channel.publish(topic, value.as_bytes()).map_err(|e| {
            log::warn!("publish to '{}' failed: {}", topic, e);
            e
        })?;
        self.sent += 1;
        log::debug!("published {} = {}", topic, value);
        Ok(())
    }

    /// Commands published so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Access the channel
    pub fn channel(&self) -> &C {
        &self.channel
    }
}

/// Write a command's patch, leaving a failed write to the store's retry
fn persist<S: ReplicaStore>(store: &mut ControlStateStore<S>, patch: ControlPatch) {
    if let Err(e) = store.set(patch) {
        log::warn!("command not persisted yet ({}): {}", store.sync_status(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::config::DashboardConfig;
    use crate::control::SyncStatus;
    use crate::countdown::TimerPhase;
    use crate::replica::MemoryStore;

    struct Fixture {
        channel: MemoryChannel,
        replica: MemoryStore,
        publisher: CommandPublisher<MemoryChannel>,
        store: ControlStateStore<MemoryStore>,
        countdown: CountdownProcess,
    }

    fn fixture() -> Fixture {
        let channel = MemoryChannel::new();
        let replica = MemoryStore::new();
        Fixture {
            publisher: CommandPublisher::new(channel.clone()),
            store: ControlStateStore::open(replica.clone(), &DashboardConfig::default()).unwrap(),
            countdown: CountdownProcess::new(),
            channel,
            replica,
        }
    }

    #[test]
    fn test_publish_hour() {
        let mut f = fixture();
        let outcome = f
            .publisher
            .publish_hour("2", &mut f.store, &mut f.countdown)
            .unwrap();

        assert!(matches!(
            outcome,
            CommandOutcome::Published {
                topic: "hour",
                timer: Some(_)
            }
        ));
        assert_eq!(f.channel.published(), vec![("hour".to_string(), b"2".to_vec())]);
        assert_eq!(f.store.get().hour, "2");
        assert_eq!(f.store.get().time_left, Some(7200));
        assert_eq!(f.countdown.phase(), TimerPhase::Running);
        assert_eq!(f.publisher.sent(), 1);
    }

    #[test]
    fn test_blank_input_is_noop() {
        let mut f = fixture();
        for raw in ["", "   ", "\t\n"] {
            let outcome = f
                .publisher
                .publish_hour(raw, &mut f.store, &mut f.countdown)
                .unwrap();
            assert_eq!(outcome, CommandOutcome::Ignored);
            assert_eq!(
                f.publisher.publish_mode(raw, &mut f.store).unwrap(),
                CommandOutcome::Ignored
            );
        }

        assert!(f.channel.published().is_empty());
        assert_eq!(f.replica.write_count(), 0);
        assert_eq!(f.countdown.phase(), TimerPhase::Idle);
    }

    #[test]
    fn test_invalid_hour_rejected_without_side_effects() {
        let mut f = fixture();
        for raw in ["abc", "1.5", "-1", "0"] {
            let err = f
                .publisher
                .publish_hour(raw, &mut f.store, &mut f.countdown)
                .unwrap_err();
            assert!(matches!(err, CommandError::InvalidHour(_)));
        }

        assert!(f.channel.published().is_empty());
        assert_eq!(f.replica.write_count(), 0);
        assert_eq!(f.store.get().hour, "");
    }

    #[test]
    fn test_store_failure_still_publishes() {
        let mut f = fixture();
        f.replica.fail_next_writes(2);

        let outcome = f
            .publisher
            .publish_hour("1", &mut f.store, &mut f.countdown)
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Published { timer: Some(_), .. }));
        assert_eq!(f.channel.published(), vec![("hour".to_string(), b"1".to_vec())]);
        assert_eq!(f.countdown.phase(), TimerPhase::Running);
        assert_eq!(f.store.get().time_left, Some(3600));
        assert!(matches!(f.store.sync_status(), SyncStatus::Pending { .. }));
        assert!(f.replica.read("controlState").unwrap().is_none());
    }

    #[test]
    fn test_publish_failure_does_not_start_countdown() {
        let mut f = fixture();
        f.channel.fail_publishes(true);

        let err = f
            .publisher
            .publish_hour("1", &mut f.store, &mut f.countdown)
            .unwrap_err();
        assert!(matches!(err, CommandError::Channel(_)));
        assert_eq!(f.countdown.phase(), TimerPhase::Idle);
        assert_eq!(f.publisher.sent(), 0);
    }

    #[test]
    fn test_publish_mode_trims_and_keeps_countdown() {
        let mut f = fixture();
        f.publisher
            .publish_hour("1", &mut f.store, &mut f.countdown)
            .unwrap();

        let outcome = f.publisher.publish_mode(" 3 ", &mut f.store).unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Published {
                topic: "mode",
                timer: None
            }
        );
        assert_eq!(f.store.get().mode, "3");
        assert_eq!(f.store.get().time_left, Some(3600));
        assert_eq!(f.channel.published()[1], ("mode".to_string(), b"3".to_vec()));
    }
}

/// Single-slot hand-off of compiled engines to the inspection pipeline
use super::matcher::MatchEngine;
use crate::error::{Result, SigError};
use crate::rules::row_id::RowId;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Immutable engine as of a given rule version
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub engine: Arc<MatchEngine>,
    pub pattern_count: usize,
    /// Id of the rule whose registration triggered the build
    pub version: RowId,
}

/// What to do when the previous snapshot has not been consumed yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Wait until the consumer takes the pending snapshot
    #[default]
    Blocking,
    /// Replace the pending snapshot with the newer one
    Supersede,
}

/// Publishes engine snapshots through a channel holding at most one value
#[derive(Debug)]
pub struct UpdateDistributor {
    tx: Sender<EngineSnapshot>,
    rx: Receiver<EngineSnapshot>,
    mode: PublishMode,
    latest: Mutex<Option<EngineSnapshot>>,
}

impl UpdateDistributor {
    pub fn new(mode: PublishMode) -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx,
            rx,
            mode,
            latest: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Receiving end of the update channel. Intended for a single consumer;
    /// clones share the same slot.
    pub fn subscribe(&self) -> Receiver<EngineSnapshot> {
        self.rx.clone()
    }

    /// Most recently published snapshot
    pub fn current(&self) -> Option<EngineSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publish a snapshot. In blocking mode this waits for the slot to drain.
    pub fn publish(&self, snapshot: EngineSnapshot) -> Result<()> {
        debug!(
            "Publishing engine version {} ({} patterns)",
            snapshot.version, snapshot.pattern_count
        );

        match self.mode {
            PublishMode::Blocking => self.tx.send(snapshot.clone())?,
            PublishMode::Supersede => {
                let mut pending = snapshot.clone();
                loop {
                    match self.tx.try_send(pending) {
                        Ok(()) => break,
                        Err(TrySendError::Full(back)) => {
                            if let Ok(stale) = self.rx.try_recv() {
                                debug!("Dropping unconsumed engine version {}", stale.version);
                            }
                            pending = back;
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            return Err(SigError::ChannelSendError)
                        }
                    }
                }
            }
        }

        *self
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use std::thread;
    use std::time::Duration;

    fn snapshot(sequence: u64) -> EngineSnapshot {
        let engine = MatchEngine::build(std::iter::empty(), &EngineConfig::default()).unwrap();
        EngineSnapshot {
            engine: Arc::new(engine),
            pattern_count: 0,
            version: RowId::new(1, sequence),
        }
    }

    #[test]
    fn test_supersede_keeps_latest() {
        let distributor = UpdateDistributor::new(PublishMode::Supersede);
        let rx = distributor.subscribe();

        distributor.publish(snapshot(1)).unwrap();
        distributor.publish(snapshot(2)).unwrap();
        distributor.publish(snapshot(3)).unwrap();

        assert_eq!(rx.try_recv().unwrap().version, RowId::new(1, 3));
        assert!(rx.try_recv().is_err());
        assert_eq!(distributor.current().unwrap().version, RowId::new(1, 3));
    }

    #[test]
    fn test_blocking_waits_for_consumer() {
        let distributor = Arc::new(UpdateDistributor::new(PublishMode::Blocking));
        let rx = distributor.subscribe();

        distributor.publish(snapshot(1)).unwrap();

        let producer = {
            let distributor = distributor.clone();
            thread::spawn(move || distributor.publish(snapshot(2)))
        };

        thread::sleep(Duration::from_millis(50));
        // second publish is parked until the first snapshot is drained
        assert_eq!(distributor.current().unwrap().version, RowId::new(1, 1));

        assert_eq!(rx.recv().unwrap().version, RowId::new(1, 1));
        producer.join().unwrap().unwrap();
        assert_eq!(rx.recv().unwrap().version, RowId::new(1, 2));
        assert_eq!(distributor.current().unwrap().version, RowId::new(1, 2));
    }

    #[test]
    fn test_current_empty_before_publish() {
        let distributor = UpdateDistributor::new(PublishMode::Blocking);
        assert!(distributor.current().is_none());
    }

    #[test]
    fn test_publish_mode_serde() {
        let mode: PublishMode = serde_yaml::from_str("supersede").unwrap();
        assert_eq!(mode, PublishMode::Supersede);
    }
}

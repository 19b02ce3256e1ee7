//! Background expiry sweeps.
//!
//! Reads never depend on this task: expired entries are already invisible.
//! Sweeping only reclaims space.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wren_core::{Partition, StoreError};

use super::traits::TtlStore;

/// Sweep every partition once. Returns the total number of deleted entries.
///
/// Stops at the first failing partition.
pub fn sweep_all(store: &dyn TtlStore) -> Result<usize, StoreError> {
    let mut total = 0;
    for partition in Partition::ALL {
        total += store.sweep(partition)?;
    }
    Ok(total)
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl SweeperHandle {
    /// Stop the task and return the number of entries it deleted.
    pub async fn shutdown(mut self) -> u64 {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task).await.unwrap_or(0)
    }
}

/// Spawn a task that sweeps all partitions every `interval`.
///
/// Failures are logged and the task keeps running; a partition that fails
/// does not stop the others from being swept.
pub fn spawn_sweeper(store: Arc<dyn TtlStore>, interval: Duration) -> SweeperHandle {
    let (tx, mut rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut total: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    for partition in Partition::ALL {
                        match store.sweep(partition) {
                            Ok(0) => {}
                            Ok(deleted) => {
                                total += deleted as u64;
                                tracing::info!(partition = partition.name(), deleted, "Expired entries swept");
                            }
                            Err(e) => {
                                tracing::warn!(partition = partition.name(), error = %e, "Sweep failed");
                            }
                        }
                    }
                }
            }
        }

        tracing::debug!(total, "Sweeper stopped");
        total
    });

    SweeperHandle {
        shutdown: Some(tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryTtlStore;
    use wren_core::{ManualClock, PartitionPolicies};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_expired_entries() {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryTtlStore::new(
            PartitionPolicies::default(),
            Arc::new(clock.clone()),
        ));
        store.set(Partition::Like, "1", b"a".to_vec()).expect("set");
        store.set(Partition::Bookmark, "2", b"b".to_vec()).expect("set");
        store.set(Partition::Item, "3", b"c".to_vec()).expect("set");

        // Likes and bookmarks live an hour, items a day.
        clock.advance(Duration::from_secs(2 * 60 * 60));

        let handle = spawn_sweeper(store.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(store.physical_len(Partition::Like), 0);
        assert_eq!(store.physical_len(Partition::Bookmark), 0);
        assert_eq!(store.physical_len(Partition::Item), 1);
        assert_eq!(handle.shutdown().await, 2);
    }

    #[test]
    fn test_sweep_all_counts_every_partition() {
        let clock = ManualClock::starting_now();
        let store = InMemoryTtlStore::new(PartitionPolicies::default(), Arc::new(clock.clone()));
        store.set(Partition::Like, "1", b"a".to_vec()).expect("set");
        store.set(Partition::Media, "2", b"b".to_vec()).expect("set");
        clock.advance(Duration::from_secs(8 * 24 * 60 * 60));
        assert_eq!(sweep_all(&store).expect("sweep"), 2);
    }
}

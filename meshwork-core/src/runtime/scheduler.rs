//! Periodic and one-shot task scheduling

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Work run when a schedule fires. Usually posts a tick into an actor queue.
pub type ScheduledTask = Arc<dyn Fn() + Send + Sync>;

/// Keyed scheduler. Scheduling an existing key replaces the old schedule.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, key: &str, delay: Duration, task: ScheduledTask);

    /// Run `task` every `interval`, first after one full interval
    fn schedule_repeating(&self, key: &str, interval: Duration, task: ScheduledTask);

    /// Returns whether a schedule existed
    fn cancel(&self, key: &str) -> bool;

    fn is_scheduled(&self, key: &str) -> bool;
}

/// Scheduler backed by tokio tasks
#[derive(Default)]
pub struct TokioScheduler {
    tasks: DashMap<String, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn replace(&self, key: &str, handle: JoinHandle<()>) {
        if let Some(previous) = self.tasks.insert(key.to_string(), handle) {
            previous.abort();
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, key: &str, delay: Duration, task: ScheduledTask) {
        trace!(key, ?delay, "schedule once");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        self.replace(key, handle);
    }

    fn schedule_repeating(&self, key: &str, interval: Duration, task: ScheduledTask) {
        trace!(key, ?interval, "schedule repeating");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task();
            }
        });
        self.replace(key, handle);
    }

    fn cancel(&self, key: &str) -> bool {
        match self.tasks.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, key: &str) -> bool {
        self.tasks
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}

#[derive(Clone)]
struct ManualEntry {
    interval: Duration,
    repeating: bool,
    task: ScheduledTask,
}

/// Scheduler that never fires by itself: tests call [`ManualScheduler::fire`]
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<BTreeMap<String, ManualEntry>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run the task registered under `key`. One-shot schedules are consumed.
    pub fn fire(&self, key: &str) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if !entry.repeating => entries.remove(key),
                Some(entry) => Some(entry.clone()),
                None => None,
            }
        };
        match entry {
            Some(entry) => {
                (entry.task)();
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn interval_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().get(key).map(|entry| entry.interval)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, key: &str, delay: Duration, task: ScheduledTask) {
        self.entries.lock().insert(
            key.to_string(),
            ManualEntry {
                interval: delay,
                repeating: false,
                task,
            },
        );
    }

    fn schedule_repeating(&self, key: &str, interval: Duration, task: ScheduledTask) {
        self.entries.lock().insert(
            key.to_string(),
            ManualEntry {
                interval,
                repeating: true,
                task,
            },
        );
    }

    fn cancel(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    fn is_scheduled(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, ScheduledTask) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_manual_once_is_consumed() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        scheduler.schedule_once("retry", Duration::from_millis(10), task);

        assert!(scheduler.fire("retry"));
        assert!(!scheduler.fire("retry"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_repeating_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let (count, task) = counter();
        scheduler.schedule_repeating("gossip", Duration::from_secs(1), task);

        scheduler.fire("gossip");
        scheduler.fire("gossip");
        assert_eq!(scheduler.interval_of("gossip"), Some(Duration::from_secs(1)));
        assert!(scheduler.cancel("gossip"));
        assert!(!scheduler.fire("gossip"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_repeating_fires_each_interval() {
        let scheduler = TokioScheduler::new();
        let (count, task) = counter();
        scheduler.schedule_repeating("tick", Duration::from_millis(100), task);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        assert!(scheduler.cancel("tick"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_reschedule_replaces_previous() {
        let scheduler = TokioScheduler::new();
        let (count, task) = counter();
        scheduler.schedule_once("once", Duration::from_millis(100), Arc::clone(&task));
        scheduler.schedule_once("once", Duration::from_millis(200), task);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

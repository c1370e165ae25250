// Periodic beacon trigger
//
// The beacon machine decides the interval. A scheduler only turns "every N
// minutes" into ticks. Re-registering replaces the previous registration.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub trait BeaconScheduler: Send + Sync {
    fn register(&self, interval: Duration);
    fn unregister(&self);
}

/// One periodic trigger firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconTick {
    pub interval: Duration,
    /// Registration that produced this tick
    pub generation: u64,
}

/// Tokio-driven trigger that sends a `BeaconTick` every interval.
///
/// `register` spawns the timer task, so it must run inside a Tokio runtime.
#[derive(Debug)]
pub struct IntervalTrigger {
    ticks: mpsc::UnboundedSender<BeaconTick>,
    task: Mutex<Option<JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
}

/// Receiving end of an `IntervalTrigger`.
///
/// Ticks queued before the latest `register` or `unregister` are dropped
/// here, so a host never fires a beacon for a cancelled registration.
#[derive(Debug)]
pub struct BeaconTicks {
    rx: mpsc::UnboundedReceiver<BeaconTick>,
    generation: Arc<AtomicU64>,
}

impl BeaconTicks {
    fn is_current(&self, tick: &BeaconTick) -> bool {
        tick.generation == self.generation.load(Ordering::SeqCst)
    }

    /// Next live tick, or `None` once the trigger is dropped
    pub async fn recv(&mut self) -> Option<BeaconTick> {
        while let Some(tick) = self.rx.recv().await {
            if self.is_current(&tick) {
                return Some(tick);
            }
            debug!("Dropped stale beacon tick from generation {}", tick.generation);
        }
        None
    }

    pub fn try_recv(&mut self) -> Result<BeaconTick, mpsc::error::TryRecvError> {
        loop {
            let tick = self.rx.try_recv()?;
            if self.is_current(&tick) {
                return Ok(tick);
            }
        }
    }
}

impl IntervalTrigger {
    pub fn channel() -> (Self, BeaconTicks) {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let trigger = Self {
            ticks: tx,
            task: Mutex::new(None),
            generation: generation.clone(),
        };
        (trigger, BeaconTicks { rx, generation })
    }

    pub fn is_registered(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl BeaconScheduler for IntervalTrigger {
    fn register(&self, interval: Duration) {
        let mut task = self.task.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ticks = self.ticks.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut timer = tokio::time::interval_at(start, interval);
            loop {
                timer.tick().await;
                let tick = BeaconTick {
                    interval,
                    generation,
                };
                if ticks.send(tick).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        debug!("Beacon trigger every {:?}", interval);
    }

    fn unregister(&self) {
        let mut task = self.task.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = task.take() {
            task.abort();
            debug!("Beacon trigger stopped");
        }
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Records registrations without running a timer. The host polls
/// `interval()` and fires beacons itself, or a test inspects the history.
#[derive(Debug, Default)]
pub struct ManualTrigger {
    interval: Mutex<Option<Duration>>,
    registrations: AtomicUsize,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval of the live registration, if any
    pub fn interval(&self) -> Option<Duration> {
        *self.interval.lock()
    }

    /// Total `register` calls so far
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

impl BeaconScheduler for ManualTrigger {
    fn register(&self, interval: Duration) {
        *self.interval.lock() = Some(interval);
        self.registrations.fetch_add(1, Ordering::SeqCst);
    }

    fn unregister(&self) {
        *self.interval.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_trigger_ticks() {
        let (trigger, mut ticks) = IntervalTrigger::channel();
        trigger.register(Duration::from_secs(5 * 60));
        assert!(trigger.is_registered());

        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick.interval, Duration::from_secs(300));
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_replaces_interval() {
        let (trigger, mut ticks) = IntervalTrigger::channel();
        trigger.register(Duration::from_secs(300));
        trigger.register(Duration::from_secs(900));

        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick.interval, Duration::from_secs(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_stops_ticks() {
        let (trigger, mut ticks) = IntervalTrigger::channel();
        trigger.register(Duration::from_secs(60));
        trigger.unregister();
        assert!(!trigger.is_registered());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_tick_dropped_after_unregister() {
        let (trigger, mut ticks) = IntervalTrigger::channel();
        trigger.register(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        trigger.unregister();

        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_tick_dropped_after_reregister() {
        let (trigger, mut ticks) = IntervalTrigger::channel();
        trigger.register(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        trigger.register(Duration::from_secs(900));

        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick.interval, Duration::from_secs(900));
        assert_eq!(tick.generation, 2);
    }

    #[test]
    fn test_manual_trigger() {
        let trigger = ManualTrigger::new();
        trigger.register(Duration::from_secs(300));
        trigger.register(Duration::from_secs(900));
        assert_eq!(trigger.interval(), Some(Duration::from_secs(900)));
        assert_eq!(trigger.registrations(), 2);
        trigger.unregister();
        assert_eq!(trigger.interval(), None);
    }
}

use crate::domain::ports::{Clock, TimerCallback, TimerHandle, TimerScheduler};
use crate::error::{PaymentError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Wall-clock time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Timers backed by tokio tasks.
///
/// Each scheduled callback runs on its own task after `tokio::time::sleep`;
/// cancelling aborts the task.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Binds to the runtime the caller is running on.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| PaymentError::TimerError(format!("No tokio runtime available: {}", e)))?;
        Ok(Self { runtime })
    }
}

struct TaskHandle(JoinHandle<()>);

impl TimerHandle for TaskHandle {
    fn cancel(self: Box<Self>) {
        self.0.abort();
    }
}

impl TimerScheduler for TokioTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Box<dyn TimerHandle> {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Box::new(TaskHandle(task))
    }
}

#[derive(Default)]
struct Wheel {
    elapsed: Duration,
    next_id: u64,
    // Keyed by (deadline, id) so equal deadlines fire in scheduling order.
    timers: BTreeMap<(Duration, u64), TimerCallback>,
}

/// Virtual time for deterministic runs.
///
/// Time only moves through [`ManualClock::advance`] and
/// [`ManualClock::advance_to`]; timers that fall due are fired in deadline
/// order, outside the internal lock, so a callback may schedule or cancel
/// further timers.
#[derive(Clone)]
pub struct ManualClock {
    origin: Instant,
    wheel: Arc<Mutex<Wheel>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wheel: Arc::new(Mutex::new(Wheel::default())),
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        self.wheel.lock().elapsed
    }

    pub fn pending_timers(&self) -> usize {
        self.wheel.lock().timers.len()
    }

    /// Virtual time at which the earliest pending timer falls due.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.wheel.lock().timers.keys().next().map(|key| key.0)
    }

    pub fn advance(&self, by: Duration) -> usize {
        let target = self.elapsed() + by;
        self.advance_to(target)
    }

    /// Moves virtual time forward to `target` (never backwards) and returns
    /// how many timers fired.
    pub fn advance_to(&self, target: Duration) -> usize {
        let mut fired = 0;
        loop {
            let due = {
                let mut wheel = self.wheel.lock();
                let next = wheel.timers.keys().next().copied();
                match next {
                    Some(key) if key.0 <= target => {
                        wheel.elapsed = wheel.elapsed.max(key.0);
                        wheel.timers.remove(&key)
                    }
                    _ => {
                        wheel.elapsed = wheel.elapsed.max(target);
                        None
                    }
                }
            };
            match due {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

struct WheelHandle {
    key: (Duration, u64),
    wheel: Arc<Mutex<Wheel>>,
}

impl TimerHandle for WheelHandle {
    fn cancel(self: Box<Self>) {
        self.wheel.lock().timers.remove(&self.key);
    }
}

impl TimerScheduler for ManualClock {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Box<dyn TimerHandle> {
        let mut wheel = self.wheel.lock();
        wheel.next_id += 1;
        let key = (wheel.elapsed + delay, wheel.next_id);
        wheel.timers.insert(key, callback);
        Box::new(WheelHandle {
            key,
            wheel: self.wheel.clone(),
        })
    }
}

//! Time utilities for match simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Get current Unix timestamp in seconds
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 30; // 30 ticks per second
pub const SNAPSHOT_TPS: u32 = 10; // 10 snapshots per second

/// Calculate delta time for one simulation tick (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Handle to a deferred continuation scheduled on a [`TimerQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct PendingTimer<T> {
    handle: TimerHandle,
    due_at: f32,
    epoch: u64,
    payload: T,
}

/// A timer that came due during [`TimerQueue::poll`]
#[derive(Debug, Clone, PartialEq)]
pub struct FiredTimer<T> {
    /// Epoch the timer was scheduled under
    pub epoch: u64,
    pub payload: T,
}

/// Deferred continuations keyed to simulation time.
///
/// Timers never fire on their own: the owner polls the queue from its tick
/// loop, so a continuation always runs on the single writer. Each timer
/// carries the epoch it was scheduled under so the owner can discard
/// continuations that outlived the state that created them.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    pending: Vec<PendingTimer<T>>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: Vec::new(),
        }
    }

    /// Schedule `payload` to come due `delay` seconds after `now`
    pub fn schedule(&mut self, now: f32, delay: f32, epoch: u64, payload: T) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.pending.push(PendingTimer {
            handle,
            due_at: now + delay.max(0.0),
            epoch,
            payload,
        });
        handle
    }

    /// Cancel a pending timer, returns false if it already fired or was cancelled
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|t| t.handle != handle);
        self.pending.len() != before
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.iter().any(|t| t.handle == handle)
    }

    /// Remove and return every timer due at or before `now`, earliest first
    pub fn poll(&mut self, now: f32) -> Vec<FiredTimer<T>> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].due_at <= now {
                due.push(self.pending.swap_remove(i));
            } else {
                i += 1;
            }
        }

        due.sort_by(|a, b| {
            a.due_at
                .total_cmp(&b.due_at)
                .then(a.handle.0.cmp(&b.handle.0))
        });
        due.into_iter()
            .map(|t| FiredTimer {
                epoch: t.epoch,
                payload: t.payload,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_when_due() {
        let mut timers = TimerQueue::new();
        timers.schedule(0.0, 2.0, 1, "load");

        assert!(timers.poll(1.9).is_empty());
        let fired = timers.poll(2.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].payload, "load");
        assert_eq!(fired[0].epoch, 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut timers = TimerQueue::new();
        let handle = timers.schedule(0.0, 1.0, 1, 42u32);

        assert!(timers.is_pending(handle));
        assert!(timers.cancel(handle));
        assert!(!timers.cancel(handle));
        assert!(timers.poll(10.0).is_empty());
    }

    #[test]
    fn test_poll_orders_by_due_time() {
        let mut timers = TimerQueue::new();
        timers.schedule(0.0, 3.0, 1, 'c');
        timers.schedule(0.0, 1.0, 1, 'a');
        timers.schedule(0.0, 2.0, 2, 'b');

        let fired: Vec<char> = timers.poll(5.0).into_iter().map(|t| t.payload).collect();
        assert_eq!(fired, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_tick_delta_matches_rate() {
        assert!((tick_delta() * SIMULATION_TPS as f32 - 1.0).abs() < 1e-6);
    }
}

//! Hashed timing wheel used to fire request timeouts without a per-request
//! timer task (§4.F: "schedule a timeout tick on a hashed timing wheel
//! (tick = 100 ms, 512 wheels)").

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

struct Entry {
    request_id: u64,
    remaining_rounds: u32,
}

pub struct TimingWheel {
    slots: Vec<Mutex<Vec<Entry>>>,
    cursor: AtomicUsize,
}

/// A handle letting the caller cancel a scheduled timeout before it fires
/// (used when the response arrives first).
#[derive(Clone, Copy)]
pub struct WheelHandle {
    slot: usize,
    request_id: u64,
}

impl TimingWheel {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Schedules `request_id` to fire after `ticks` advances of the wheel.
    pub fn schedule(&self, request_id: u64, ticks: usize) -> WheelHandle {
        let size = self.slots.len();
        let ticks = ticks.max(1);
        let rounds = (ticks / size) as u32;
        let slot = (self.cursor.load(Ordering::SeqCst) + ticks) % size;
        self.slots[slot].lock().push(Entry { request_id, remaining_rounds: rounds });
        WheelHandle { slot, request_id }
    }

    pub fn cancel(&self, handle: WheelHandle) {
        self.slots[handle.slot].lock().retain(|e| e.request_id != handle.request_id);
    }

    /// Advances the wheel by one tick, returning every request id whose
    /// timeout fired on this tick.
    pub fn advance(&self) -> Vec<u64> {
        let size = self.slots.len();
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % size;
        let mut fired = Vec::new();
        let mut bucket = self.slots[idx].lock();
        bucket.retain_mut(|entry| {
            if entry.remaining_rounds == 0 {
                fired.push(entry.request_id);
                false
            } else {
                entry.remaining_rounds -= 1;
                true
            }
        });
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_exactly_the_scheduled_number_of_ticks() {
        let wheel = TimingWheel::new(8);
        wheel.schedule(42, 3);
        assert!(wheel.advance().is_empty());
        assert!(wheel.advance().is_empty());
        assert_eq!(wheel.advance(), vec![42]);
    }

    #[test]
    fn cancel_prevents_a_later_fire() {
        let wheel = TimingWheel::new(8);
        let handle = wheel.schedule(7, 2);
        wheel.cancel(handle);
        assert!(wheel.advance().is_empty());
        assert!(wheel.advance().is_empty());
    }

    #[test]
    fn survives_multiple_revolutions_of_a_small_wheel() {
        let wheel = TimingWheel::new(4);
        wheel.schedule(1, 10); // two full revolutions plus two ticks
        for _ in 0..9 {
            assert!(wheel.advance().is_empty());
        }
        assert_eq!(wheel.advance(), vec![1]);
    }
}

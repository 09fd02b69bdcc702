//! Throttled progress helpers shared by the scanner (C4) and apply engine
//! (C10), so neither couples its own throughput to the UI's render rate.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Throttles by wall-clock time only: used by the scanner, which emits
/// `(current_relpath, dirs_scanned, files_seen)` at most every
/// `interval`.
pub struct ScanProgressThrottle {
	interval: Duration,
	last_emit: Mutex<Instant>,
}

impl ScanProgressThrottle {
	pub fn new(interval: Duration) -> Self {
		ScanProgressThrottle { interval, last_emit: Mutex::new(Instant::now() - interval) }
	}

	/// Returns true if enough time has passed since the last emission;
	/// records the call as an emission when it does.
	pub fn should_emit(&self) -> bool {
		let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
		if last.elapsed() >= self.interval {
			*last = Instant::now();
			true
		} else {
			false
		}
	}
}

/// Throttles apply-engine progress callbacks: emits when the total is
/// reached, an operation failed, `every_ops` operations have completed
/// since the last emit, or `every_ms` has elapsed — whichever comes first.
pub struct ApplyProgressThrottle {
	every_ops: u64,
	every_ms: Duration,
	ops_since_emit: Mutex<u64>,
	last_emit: Mutex<Instant>,
}

impl ApplyProgressThrottle {
	pub fn new(every_ops: u64, every_ms: u64) -> Self {
		ApplyProgressThrottle {
			every_ops: every_ops.max(1),
			every_ms: Duration::from_millis(every_ms),
			ops_since_emit: Mutex::new(0),
			last_emit: Mutex::new(Instant::now()),
		}
	}

	/// Call once per completed operation. `done == total` or `ok == false`
	/// force an emission regardless of throttling.
	pub fn should_emit(&self, done: u64, total: u64, ok: bool) -> bool {
		if done >= total || !ok {
			self.reset();
			return true;
		}

		let mut ops = self.ops_since_emit.lock().unwrap_or_else(|e| e.into_inner());
		*ops += 1;

		let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
		let due = *ops >= self.every_ops || last.elapsed() >= self.every_ms;
		if due {
			*ops = 0;
			*last = Instant::now();
		}
		due
	}

	fn reset(&self) {
		*self.ops_since_emit.lock().unwrap_or_else(|e| e.into_inner()) = 0;
		*self.last_emit.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scan_throttle_allows_first_call_immediately() {
		let throttle = ScanProgressThrottle::new(Duration::from_millis(200));
		assert!(throttle.should_emit());
		assert!(!throttle.should_emit());
	}

	#[test]
	fn apply_throttle_forces_emit_at_total() {
		let throttle = ApplyProgressThrottle::new(1000, 60_000);
		assert!(throttle.should_emit(10, 10, true));
	}

	#[test]
	fn apply_throttle_forces_emit_on_failure() {
		let throttle = ApplyProgressThrottle::new(1000, 60_000);
		assert!(throttle.should_emit(1, 10, false));
	}

	#[test]
	fn apply_throttle_emits_every_n_ops() {
		let throttle = ApplyProgressThrottle::new(2, 60_000);
		assert!(!throttle.should_emit(1, 10, true));
		assert!(throttle.should_emit(2, 10, true));
	}
}

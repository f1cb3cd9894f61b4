//! Engine startup and readiness state machine.
//!
//! ```text
//! NotStarted --start()--> Started --mark_ready()--> Ready
//! ```
//!
//! Transitions only move forward. Callers waiting for readiness while the
//! engine is `Started` are queued and released in registration order when the
//! `ready` signal arrives.

use std::collections::VecDeque;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Observable state of the embedded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
	NotStarted,
	Started,
	Ready,
}

impl std::fmt::Display for EngineState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			EngineState::NotStarted => f.write_str("not started"),
			EngineState::Started => f.write_str("started"),
			EngineState::Ready => f.write_str("ready"),
		}
	}
}

struct LifecycleInner {
	state: EngineState,
	waiters: VecDeque<oneshot::Sender<()>>,
}

enum Waiter {
	Rejected,
	Ready,
	Pending(oneshot::Receiver<()>),
}

/// Thread-safe lifecycle of one engine instance.
pub struct EngineLifecycle {
	inner: Mutex<LifecycleInner>,
}

impl Default for EngineLifecycle {
	fn default() -> Self {
		Self::new()
	}
}

impl EngineLifecycle {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(LifecycleInner {
				state: EngineState::NotStarted,
				waiters: VecDeque::new(),
			}),
		}
	}

	/// Returns the current state.
	pub fn state(&self) -> EngineState {
		self.inner.lock().state
	}

	/// Moves `NotStarted` to `Started`.
	pub fn start(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		if inner.state != EngineState::NotStarted {
			return Err(Error::AlreadyStarted);
		}
		inner.state = EngineState::Started;
		tracing::debug!("Engine state: started");
		Ok(())
	}

	/// Handles the `ready` signal from the subprocess.
	///
	/// Returns true if this call moved the engine to `Ready`. Repeated signals
	/// and signals observed before `start` change nothing.
	pub fn mark_ready(&self) -> bool {
		let waiters = {
			let mut inner = self.inner.lock();
			match inner.state {
				EngineState::Started => {
					inner.state = EngineState::Ready;
					std::mem::take(&mut inner.waiters)
				}
				EngineState::Ready => {
					tracing::debug!("Duplicate ready signal ignored");
					return false;
				}
				EngineState::NotStarted => {
					tracing::warn!("Ready signal received before the engine was started; ignoring");
					return false;
				}
			}
		};

		tracing::debug!(waiters = waiters.len(), "Engine state: ready");
		for waiter in waiters {
			// Dropped waiters never observe readiness.
			let _ = waiter.send(());
		}
		true
	}

	/// Returns a future resolving once the engine is ready.
	///
	/// The state is inspected when this is called, not when the future is
	/// first polled: `NotStarted` yields [`Error::NotStarted`], `Ready`
	/// resolves after one scheduling turn, and `Started` queues a waiter.
	pub fn when_ready(&self) -> impl Future<Output = Result<()>> + Send + 'static {
		let waiter = {
			let mut inner = self.inner.lock();
			match inner.state {
				EngineState::NotStarted => Waiter::Rejected,
				EngineState::Ready => Waiter::Ready,
				EngineState::Started => {
					let (tx, rx) = oneshot::channel();
					inner.waiters.push_back(tx);
					Waiter::Pending(rx)
				}
			}
		};

		async move {
			match waiter {
				Waiter::Rejected => Err(Error::NotStarted),
				Waiter::Ready => {
					tokio::task::yield_now().await;
					Ok(())
				}
				Waiter::Pending(rx) => rx.await.map_err(|_| Error::ChannelClosed),
			}
		}
	}

	/// Fails unless the engine is ready to receive events.
	pub fn guard_send(&self) -> Result<()> {
		match self.state() {
			EngineState::NotStarted => Err(Error::NotStarted),
			EngineState::Started => Err(Error::NotReady),
			EngineState::Ready => Ok(()),
		}
	}

	/// Returns the number of queued ready waiters.
	pub fn pending_waiters(&self) -> usize {
		self.inner.lock().waiters.len()
	}
}

impl std::fmt::Debug for EngineLifecycle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("EngineLifecycle")
			.field("state", &inner.state)
			.field("waiters", &inner.waiters.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[test]
	fn test_initial_state() {
		let lifecycle = EngineLifecycle::new();
		assert_eq!(lifecycle.state(), EngineState::NotStarted);
		assert!(matches!(lifecycle.guard_send(), Err(Error::NotStarted)));
	}

	#[test]
	fn test_start_twice_fails() {
		let lifecycle = EngineLifecycle::new();
		lifecycle.start().unwrap();
		assert_eq!(lifecycle.state(), EngineState::Started);
		assert!(matches!(lifecycle.start(), Err(Error::AlreadyStarted)));
		assert_eq!(lifecycle.state(), EngineState::Started);
	}

	#[test]
	fn test_guard_send_gates_on_ready() {
		let lifecycle = EngineLifecycle::new();
		lifecycle.start().unwrap();
		assert!(matches!(lifecycle.guard_send(), Err(Error::NotReady)));

		assert!(lifecycle.mark_ready());
		assert!(lifecycle.guard_send().is_ok());
		assert!(matches!(lifecycle.start(), Err(Error::AlreadyStarted)));
	}

	#[test]
	fn test_ready_before_start_is_ignored() {
		let lifecycle = EngineLifecycle::new();
		assert!(!lifecycle.mark_ready());
		assert_eq!(lifecycle.state(), EngineState::NotStarted);
	}

	#[tokio::test]
	async fn test_when_ready_before_start_rejects() {
		let lifecycle = EngineLifecycle::new();
		let pending = lifecycle.when_ready();

		// Starting afterwards does not rescue a future created while not started.
		lifecycle.start().unwrap();
		assert!(matches!(pending.await, Err(Error::NotStarted)));
	}

	#[tokio::test]
	async fn test_waiters_released_in_order() {
		let lifecycle = Arc::new(EngineLifecycle::new());
		lifecycle.start().unwrap();

		let order = Arc::new(Mutex::new(Vec::new()));
		let mut tasks = Vec::new();
		for label in ["first", "second", "third"] {
			let waiter = lifecycle.when_ready();
			let order = Arc::clone(&order);
			tasks.push(tokio::spawn(async move {
				waiter.await.unwrap();
				order.lock().push(label);
			}));
		}
		assert_eq!(lifecycle.pending_waiters(), 3);

		assert!(lifecycle.mark_ready());
		for task in tasks {
			task.await.unwrap();
		}
		assert_eq!(*order.lock(), vec!["first", "second", "third"]);
		assert_eq!(lifecycle.pending_waiters(), 0);
	}

	#[tokio::test]
	async fn test_duplicate_ready_is_noop() {
		let lifecycle = EngineLifecycle::new();
		lifecycle.start().unwrap();

		let waiter = lifecycle.when_ready();
		assert!(lifecycle.mark_ready());
		assert!(!lifecycle.mark_ready());
		waiter.await.unwrap();
		assert_eq!(lifecycle.state(), EngineState::Ready);
	}

	#[tokio::test]
	async fn test_when_ready_after_ready_resolves() {
		let lifecycle = EngineLifecycle::new();
		lifecycle.start().unwrap();
		lifecycle.mark_ready();

		lifecycle.when_ready().await.unwrap();
		assert_eq!(lifecycle.pending_waiters(), 0);
	}

	#[tokio::test]
	async fn test_dropped_waiter_does_not_block_drain() {
		let lifecycle = EngineLifecycle::new();
		lifecycle.start().unwrap();

		drop(lifecycle.when_ready());
		let kept = lifecycle.when_ready();
		assert!(lifecycle.mark_ready());
		kept.await.unwrap();
	}
}

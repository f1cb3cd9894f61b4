//! Lifecycle notifications of a [`Bridge`](crate::Bridge).
//!
//! Every notification is fanned out twice: to [`LifecycleStream`]
//! subscribers over a broadcast channel, and to one-shot
//! [`LifecycleWaiter`]s whose predicate matches. Waiters are served first so
//! a lagging subscriber never hides a terminal event from them.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use nodebridge_runtime::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

/// Notifications buffered per subscriber before older ones are dropped.
const STREAM_CAPACITY: usize = 64;

/// Engine and transport notifications.
///
/// Failures after startup are reported here and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
	/// The subprocess was spawned and the transport attached.
	Started,
	/// The subprocess sent `ready` on `APP_CHANNEL`.
	Ready,
	/// Starting the engine failed after the state moved to `Started`.
	StartFailed { message: String },
	/// The subprocess exited. `code` is `None` when killed by a signal.
	ProcessExited { code: Option<i32> },
	/// The transport lost its link.
	TransportClosed { reason: String },
}

impl LifecycleEvent {
	/// Returns true for events after which the engine no longer runs.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			LifecycleEvent::StartFailed { .. } | LifecycleEvent::ProcessExited { .. }
		)
	}
}

type Predicate = Box<dyn Fn(&LifecycleEvent) -> bool + Send + Sync>;

struct Waiter {
	predicate: Predicate,
	tx: oneshot::Sender<LifecycleEvent>,
}

/// Fan-out point for [`LifecycleEvent`]s.
pub(crate) struct LifecycleBus {
	tx: broadcast::Sender<LifecycleEvent>,
	waiters: Mutex<Vec<Waiter>>,
}

impl LifecycleBus {
	pub fn new() -> Self {
		Self::with_capacity(STREAM_CAPACITY)
	}

	fn with_capacity(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self {
			tx,
			waiters: Mutex::new(Vec::new()),
		}
	}

	/// Completes matching waiters, forgets abandoned ones, then broadcasts.
	pub fn emit(&self, event: LifecycleEvent) {
		{
			let mut waiters = self.waiters.lock();
			let pending = std::mem::take(&mut *waiters);
			for waiter in pending {
				if waiter.tx.is_closed() {
					continue;
				}
				if (waiter.predicate)(&event) {
					let _ = waiter.tx.send(event.clone());
				} else {
					waiters.push(waiter);
				}
			}
		}
		let _ = self.tx.send(event);
	}

	/// Subscribes to notifications emitted from now on.
	pub fn stream(&self) -> LifecycleStream {
		LifecycleStream {
			rx: self.tx.subscribe(),
		}
	}

	/// Registers a waiter for the first notification matching `predicate`.
	pub fn waiter<F>(&self, predicate: F, timeout: Duration) -> LifecycleWaiter
	where
		F: Fn(&LifecycleEvent) -> bool + Send + Sync + 'static,
	{
		let (tx, rx) = oneshot::channel();
		self.waiters.lock().push(Waiter {
			predicate: Box::new(predicate),
			tx,
		});
		LifecycleWaiter { rx, timeout }
	}
}

/// Lifecycle notifications in emission order; lag is logged and skipped.
pub struct LifecycleStream {
	rx: broadcast::Receiver<LifecycleEvent>,
}

impl LifecycleStream {
	/// Receives the next notification, or `None` once the bridge is dropped.
	pub async fn recv(&mut self) -> Option<LifecycleEvent> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Lifecycle stream lagged, dropped events");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}
}

/// One-shot capture of a lifecycle notification.
///
/// [`wait()`](Self::wait) applies the configured timeout; awaiting the waiter
/// directly does not.
pub struct LifecycleWaiter {
	rx: oneshot::Receiver<LifecycleEvent>,
	timeout: Duration,
}

impl LifecycleWaiter {
	/// Waits for the notification with the configured timeout.
	///
	/// # Errors
	///
	/// - [`Error::Timeout`] if no matching notification arrives in time
	/// - [`Error::ChannelClosed`] if the bridge is dropped
	pub async fn wait(self) -> Result<LifecycleEvent> {
		tokio::time::timeout(self.timeout, self.rx)
			.await
			.map_err(|_| Error::Timeout("Timeout waiting for lifecycle event".to_string()))?
			.map_err(|_| Error::ChannelClosed)
	}
}

impl Future for LifecycleWaiter {
	type Output = Result<LifecycleEvent>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx)
			.poll(cx)
			.map(|result| result.map_err(|_| Error::ChannelClosed))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	fn exited(code: i32) -> LifecycleEvent {
		LifecycleEvent::ProcessExited { code: Some(code) }
	}

	#[tokio::test]
	async fn streams_each_see_every_event() {
		let bus = LifecycleBus::new();
		let mut first = bus.stream();
		let mut second = bus.stream();

		bus.emit(LifecycleEvent::Started);

		assert_eq!(first.recv().await, Some(LifecycleEvent::Started));
		assert_eq!(second.recv().await, Some(LifecycleEvent::Started));
	}

	#[tokio::test]
	async fn waiter_skips_non_matching_events() {
		let bus = LifecycleBus::new();
		let waiter = bus.waiter(LifecycleEvent::is_terminal, Duration::from_secs(1));

		bus.emit(LifecycleEvent::Ready);
		bus.emit(exited(0));
		bus.emit(exited(1));

		assert_eq!(waiter.wait().await.unwrap(), exited(0));
	}

	#[tokio::test]
	async fn dropped_waiters_are_forgotten() {
		let bus = LifecycleBus::new();
		for _ in 0..3 {
			drop(bus.waiter(LifecycleEvent::is_terminal, Duration::from_secs(1)));
		}
		let kept = bus.waiter(LifecycleEvent::is_terminal, Duration::from_secs(1));

		bus.emit(LifecycleEvent::Ready);
		assert_eq!(bus.waiters.lock().len(), 1);

		bus.emit(exited(3));
		assert!(bus.waiters.lock().is_empty());
		assert_eq!(kept.await.unwrap(), exited(3));
	}

	#[tokio::test]
	async fn stream_receives_events_emitted_later() {
		let bus = Arc::new(LifecycleBus::new());
		let mut stream = bus.stream();

		let emitter = Arc::clone(&bus);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			emitter.emit(LifecycleEvent::TransportClosed {
				reason: "closed".to_string(),
			});
		});

		let event = stream.recv().await.unwrap();
		assert!(matches!(event, LifecycleEvent::TransportClosed { .. }));
	}

	#[tokio::test]
	async fn lagging_stream_resumes_at_oldest_retained() {
		let bus = LifecycleBus::with_capacity(2);
		let mut stream = bus.stream();

		for code in 0..4 {
			bus.emit(exited(code));
		}

		assert_eq!(stream.recv().await, Some(exited(2)));
		assert_eq!(stream.recv().await, Some(exited(3)));
	}

	#[tokio::test]
	async fn stream_ends_when_bus_is_dropped() {
		let bus = LifecycleBus::new();
		let mut stream = bus.stream();
		drop(bus);
		assert_eq!(stream.recv().await, None);
	}

	#[tokio::test]
	async fn waiter_times_out() {
		let bus = LifecycleBus::new();
		let waiter = bus.waiter(LifecycleEvent::is_terminal, Duration::from_millis(10));
		assert!(matches!(waiter.wait().await, Err(Error::Timeout(_))));
	}

	#[tokio::test]
	async fn waiter_fails_when_bus_is_dropped() {
		let bus = LifecycleBus::new();
		let waiter = bus.waiter(LifecycleEvent::is_terminal, Duration::from_secs(1));
		drop(bus);
		assert!(matches!(waiter.await, Err(Error::ChannelClosed)));
	}

	#[test]
	fn terminal_events() {
		assert!(LifecycleEvent::ProcessExited { code: None }.is_terminal());
		assert!(LifecycleEvent::StartFailed { message: String::new() }.is_terminal());
		assert!(!LifecycleEvent::Ready.is_terminal());
		assert!(!LifecycleEvent::TransportClosed { reason: String::new() }.is_terminal());
	}
}

//! Event listener registry.
//!
//! Listeners are stored in one [`IndexMap`] keyed by [`ListenerId`], giving
//! O(1) removal and stable registration order, which is also the invocation
//! order for listeners of the same event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for a registered listener.
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique listener ID.
pub fn next_listener_id() -> ListenerId {
	NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Listener function receiving a borrowed event.
pub type ListenerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Registered listener with the event it is bound to.
pub struct ListenerEntry<E> {
	pub id: ListenerId,
	pub event_name: Arc<str>,
	pub once: bool,
	pub listener: ListenerFn<E>,
}

impl<E> Clone for ListenerEntry<E> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			event_name: Arc::clone(&self.event_name),
			once: self.once,
			listener: Arc::clone(&self.listener),
		}
	}
}

type ListenerMap<E> = Mutex<IndexMap<ListenerId, ListenerEntry<E>>>;

/// Shared, cloneable listener registry.
pub struct ListenerRegistry<E> {
	entries: Arc<ListenerMap<E>>,
}

impl<E> Clone for ListenerRegistry<E> {
	fn clone(&self) -> Self {
		Self {
			entries: Arc::clone(&self.entries),
		}
	}
}

impl<E> Default for ListenerRegistry<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E> ListenerRegistry<E> {
	pub fn new() -> Self {
		Self {
			entries: Arc::new(Mutex::new(IndexMap::new())),
		}
	}

	fn insert(&self, event_name: &str, once: bool, listener: ListenerFn<E>) -> ListenerId {
		let id = next_listener_id();
		self.entries.lock().insert(
			id,
			ListenerEntry {
				id,
				event_name: Arc::from(event_name),
				once,
				listener,
			},
		);
		id
	}

	/// Registers a persistent listener for `event_name`.
	pub fn on(&self, event_name: &str, listener: ListenerFn<E>) -> ListenerId {
		self.insert(event_name, false, listener)
	}

	/// Registers a listener removed before its first invocation.
	pub fn once(&self, event_name: &str, listener: ListenerFn<E>) -> ListenerId {
		self.insert(event_name, true, listener)
	}

	/// Removes one listener. Returns false if it was not registered.
	pub fn remove(&self, id: ListenerId) -> bool {
		self.entries.lock().shift_remove(&id).is_some()
	}

	/// Removes every listener, or only those bound to `event_name`.
	/// Returns the number removed.
	pub fn remove_all(&self, event_name: Option<&str>) -> usize {
		let mut entries = self.entries.lock();
		let before = entries.len();
		match event_name {
			Some(name) => entries.retain(|_, entry| &*entry.event_name != name),
			None => entries.clear(),
		}
		before - entries.len()
	}

	/// Returns the number of listeners bound to `event_name`.
	pub fn listener_count(&self, event_name: &str) -> usize {
		self.entries
			.lock()
			.values()
			.filter(|entry| &*entry.event_name == event_name)
			.count()
	}

	/// Returns true if no listeners are registered.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Invokes the listeners bound to `event_name` in registration order.
	///
	/// Listeners run outside the registry lock, so they may register or
	/// remove listeners. `once` listeners are removed before they run.
	/// Returns the number of listeners invoked.
	pub fn emit(&self, event_name: &str, event: &E) -> usize {
		let matching: Vec<ListenerEntry<E>> = {
			let mut entries = self.entries.lock();
			let matching: Vec<_> = entries
				.values()
				.filter(|entry| &*entry.event_name == event_name)
				.cloned()
				.collect();
			for entry in matching.iter().filter(|entry| entry.once) {
				entries.shift_remove(&entry.id);
			}
			matching
		};

		for entry in &matching {
			(entry.listener)(event);
		}
		matching.len()
	}
}

impl<E: Send + 'static> ListenerRegistry<E> {
	/// Returns an RAII handle removing listener `id` when dropped.
	pub fn subscription(&self, id: ListenerId) -> Subscription {
		let weak: Weak<ListenerMap<E>> = Arc::downgrade(&self.entries);
		Subscription::new(
			id,
			Arc::new(move |id: ListenerId| {
				if let Some(map) = weak.upgrade() {
					map.lock().shift_remove(&id);
				}
			}),
		)
	}
}

/// RAII handle that unregisters a listener on drop.
///
/// Holds a weak reference to the registry, so dropping it after the owning
/// channel is gone is a no-op.
pub struct Subscription {
	id: ListenerId,
	dropper: Option<Arc<dyn Fn(ListenerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: ListenerId, dropper: Arc<dyn Fn(ListenerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Returns this subscription's listener ID.
	pub fn id(&self) -> ListenerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}

	/// Keeps the listener registered for the registry's lifetime.
	pub fn detach(mut self) -> ListenerId {
		self.dropper.take();
		self.id
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}

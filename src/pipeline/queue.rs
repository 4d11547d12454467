//! Bounded FIFO with blocking push/pop

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A bounded FIFO guarded by a mutex and two condition variables.
/// `push` blocks while the queue is at capacity, `pop` blocks while it is
/// empty; this is the only backpressure mechanism between pipeline stages.
pub struct BoundedQueue<T> {
	items: Mutex<VecDeque<T>>,
	not_full: Condvar,
	not_empty: Condvar,
	capacity: usize,
}

impl<T> BoundedQueue<T> {
	pub fn new(capacity: usize) -> Self {
		assert!(capacity > 0, "queue capacity must be non-zero");
		Self {
			items: Mutex::new(VecDeque::with_capacity(capacity)),
			not_full: Condvar::new(),
			not_empty: Condvar::new(),
			capacity,
		}
	}

	/// Enqueue one item, blocking while the queue is full.
	pub fn push(&self, item: T) {
		let mut items = self.items.lock().unwrap();
		while items.len() >= self.capacity {
			items = self.not_full.wait(items).unwrap();
		}
		items.push_back(item);
		self.not_empty.notify_one();
	}

	/// Enqueue one item only if there is space; never blocks.
	pub fn try_push(&self, item: T) -> bool {
		let mut items = self.items.lock().unwrap();
		if items.len() >= self.capacity {
			return false;
		}
		items.push_back(item);
		self.not_empty.notify_one();
		true
	}

	/// Dequeue one item, blocking while the queue is empty.
	pub fn pop(&self) -> T {
		let mut items = self.items.lock().unwrap();
		while items.is_empty() {
			items = self.not_empty.wait(items).unwrap();
		}
		let item = items.pop_front().unwrap();
		self.not_full.notify_one();
		item
	}

	/// Remove every queued item, waking blocked producers.
	pub fn clear(&self) -> usize {
		let mut items = self.items.lock().unwrap();
		let drained = items.len();
		items.clear();
		self.not_full.notify_all();
		drained
	}

	pub fn len(&self) -> usize {
		self.items.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.lock().unwrap().is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}

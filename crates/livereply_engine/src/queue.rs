#![forbid(unsafe_code)]

use std::collections::VecDeque;

use livereply_domain::{Comment, KeywordFilter, is_system_line};
use parking_lot::Mutex;
use tracing::debug;

/// Maximum number of pending comments; the oldest is evicted beyond this.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5_000;

/// Bounded store of incoming comment lines.
///
/// Every access happens under one short lock; nothing here blocks on I/O.
#[derive(Debug)]
pub struct CommentQueue {
	inner: Mutex<VecDeque<Comment>>,
	capacity: usize,
}

impl Default for CommentQueue {
	fn default() -> Self {
		Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
	}
}

impl CommentQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			inner: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
			capacity,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Admit a comment line. Empty lines and system notices are rejected.
	pub fn enqueue(&self, line: impl Into<String>) -> bool {
		let line = line.into();
		if line.is_empty() || is_system_line(&line) {
			metrics::counter!("livereply_comments_rejected_total").increment(1);
			return false;
		}

		let comment = Comment::new(line);
		let mut q = self.inner.lock();
		if q.len() >= self.capacity {
			q.pop_front();
			metrics::counter!("livereply_comments_evicted_total").increment(1);
		}
		q.push_back(comment);
		metrics::counter!("livereply_comments_enqueued_total").increment(1);
		true
	}

	/// Pop newest-first until `max` comments pass `filter` or the queue runs dry.
	///
	/// Comments rejected by the filter are dropped for good.
	pub fn drain_newest(&self, filter: &KeywordFilter, max: usize) -> Vec<Comment> {
		let max = max.max(1);
		let mut accepted = Vec::new();
		let mut discarded = 0usize;

		{
			let mut q = self.inner.lock();
			while accepted.len() < max {
				let Some(comment) = q.pop_back() else {
					break;
				};
				if filter.accepts(&comment.raw_line) {
					accepted.push(comment);
				} else {
					discarded += 1;
				}
			}
		}

		if discarded > 0 {
			debug!(discarded, "dropped comments rejected by keyword filter");
			metrics::counter!("livereply_comments_filtered_total").increment(discarded as u64);
		}
		accepted
	}

	/// Drop every pending comment, returning how many were removed.
	pub fn clear(&self) -> usize {
		let mut q = self.inner.lock();
		let n = q.len();
		q.clear();
		debug!(cleared = n, "comment queue cleared");
		n
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().is_empty()
	}

	/// Raw lines, oldest first.
	pub fn snapshot(&self) -> Vec<String> {
		self.inner.lock().iter().map(|c| c.raw_line.clone()).collect()
	}
}

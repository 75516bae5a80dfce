//! Timers and dispatch for connect attempts and their retries

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

/// Fires one-shot connect tasks from a small pool shared by every
/// connection.
///
/// A task waits for its delay, then for a worker to fire it. The worker is
/// released before the task runs, so a slow broker handshake never delays
/// the attempts of other connections.
#[derive(Debug)]
pub struct ReconnectScheduler {
	workers: usize,
	permits: Arc<Semaphore>,
	retries: AtomicU64,
}

impl ReconnectScheduler {
	/// Creates a scheduler with `workers` concurrent tasks, at least one.
	pub fn new(workers: usize) -> Self {
		let workers = workers.max(1);
		Self {
			workers,
			permits: Arc::new(Semaphore::new(workers)),
			retries: AtomicU64::new(0),
		}
	}

	/// Number of concurrent workers.
	pub fn workers(&self) -> usize {
		self.workers
	}

	/// Number of retries scheduled so far.
	pub fn scheduled_retries(&self) -> u64 {
		self.retries.load(Ordering::Relaxed)
	}

	/// Runs `task` as soon as a worker is free.
	pub fn run_now<F>(&self, task: F) -> JoinHandle<()>
	where F: Future<Output = ()> + Send + 'static {
		self.spawn(Duration::ZERO, task)
	}

	/// Runs `task` once `delay` has elapsed and a worker is free.
	pub fn schedule_retry<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
	where F: Future<Output = ()> + Send + 'static {
		let scheduled = self.retries.fetch_add(1, Ordering::Relaxed) + 1;
		debug!(
			delay_millis = delay.as_millis() as u64,
			scheduled, "Retry scheduled"
		);
		self.spawn(delay, task)
	}

	fn spawn<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
	where F: Future<Output = ()> + Send + 'static {
		let permits = self.permits.clone();
		tokio::spawn(async move {
			if !delay.is_zero() {
				time::sleep(delay).await;
			}
			match permits.acquire().await {
				| Ok(permit) => drop(permit),
				| Err(_) => return,
			}
			task.await;
		})
	}
}

impl Default for ReconnectScheduler {
	fn default() -> Self {
		Self::new(2)
	}
}

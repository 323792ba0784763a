//! A small background worker runner: a `Worker` trait that handlers
//! implement, spawned onto dedicated tasks and driven until
//! `WorkerState::Done` or a cancellation signal fires. The job engine
//! (`gateway_jobs`) builds its handler execution loop directly on top
//! of this.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
	Busy,
	Idle,
	Done,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
	pub progress: Option<String>,
	pub freeform: Vec<String>,
}

#[async_trait]
pub trait Worker: Send + 'static {
	fn name(&self) -> String;

	fn status(&self) -> WorkerStatus {
		WorkerStatus::default()
	}

	/// Do one unit of work and report the resulting state. Called in a
	/// loop by the runner until it returns `Done` or cancellation is
	/// observed.
	async fn work(&mut self, must_exit: &mut watch::Receiver<bool>) -> Result<WorkerState, Error>;

	/// Suspend until there might be more work to do. Workers with
	/// nothing left to poll (e.g. queue-draining jobs) implement this
	/// as `unreachable!()` since `work` never returns `Idle`.
	async fn wait_for_work(&mut self) -> WorkerState;
}

/// Spawns and supervises workers on the Tokio runtime; `must_exit` is
/// shared by every worker so a single signal drains them all.
#[derive(Clone)]
pub struct BackgroundRunner {
	must_exit: watch::Sender<bool>,
}

impl BackgroundRunner {
	pub fn new() -> (Self, watch::Receiver<bool>) {
		let (must_exit, recv) = watch::channel(false);
		(Self { must_exit }, recv)
	}

	pub fn stop_all(&self) {
		let _ = self.must_exit.send(true);
	}

	pub fn spawn_worker<W: Worker>(&self, mut worker: W) {
		let mut must_exit = self.must_exit.subscribe();
		tokio::spawn(async move {
			let name = worker.name();
			debug!("worker {} starting", name);
			loop {
				if *must_exit.borrow() {
					break;
				}
				match worker.work(&mut must_exit).await {
					Ok(WorkerState::Done) => break,
					Ok(WorkerState::Busy) => continue,
					Ok(WorkerState::Idle) => {
						tokio::select! {
							_ = must_exit.changed() => {}
							state = worker.wait_for_work() => {
								if state == WorkerState::Done {
									break;
								}
							}
						}
					}
					Err(e) => {
						error!("worker {} errored: {}", name, e);
						break;
					}
				}
			}
			debug!("worker {} exiting", name);
		});
	}
}

/// A cancellation token handed to job handlers (`gateway_jobs`), backed
/// by the same `watch::Receiver<bool>` mechanism as `Worker::work`.
#[derive(Clone)]
pub struct CancellationToken {
	recv: Arc<watch::Receiver<bool>>,
}

impl CancellationToken {
	pub fn new(recv: watch::Receiver<bool>) -> Self {
		Self {
			recv: Arc::new(recv),
		}
	}

	/// A token that never fires. Used at call sites with no ambient
	/// cancellation source of their own (e.g. a single driver call
	/// outside of a job context).
	pub fn never() -> Self {
		let (_tx, recv) = watch::channel(false);
		Self { recv: Arc::new(recv) }
	}

	pub fn is_cancelled(&self) -> bool {
		*self.recv.borrow()
	}

	pub fn check(&self) -> Result<(), Error> {
		if self.is_cancelled() {
			Err(Error::Cancelled)
		} else {
			Ok(())
		}
	}
}

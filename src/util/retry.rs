//! A single retry helper shared by both multipart drivers. It understands one
//! thing: retry on rate-limiting, honoring a server-supplied
//! `retry_after`, bounded by `max_attempts`, capped exponential backoff
//! otherwise, and cancellation-aware sleeps (so a cancelled job doesn't
//! block behind a multi-second backoff).

use std::future::Future;
use std::time::Duration;

use crate::background::CancellationToken;
use crate::error::Error;

/// What a retryable call reports back about a single attempt.
pub enum Attempt<T> {
	Ok(T),
	/// Rate-limited; retry after the given duration if one more attempt
	/// is available.
	RateLimited(Option<Duration>),
	/// Any other failure is non-retryable.
	Failed(Error),
}

pub struct RetryPolicy {
	pub max_attempts: u32,
	pub base_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(30),
		}
	}
}

impl RetryPolicy {
	pub async fn run<T, F, Fut>(
		&self,
		cancel: &CancellationToken,
		mut attempt: F,
	) -> Result<T, Error>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Attempt<T>>,
	{
		let mut tries = 0;
		loop {
			cancel.check()?;
			tries += 1;
			match attempt(tries).await {
				Attempt::Ok(v) => return Ok(v),
				Attempt::Failed(e) => return Err(e),
				Attempt::RateLimited(retry_after) => {
					if tries >= self.max_attempts {
						return Err(Error::Upstream(
							"rate limited, retry attempts exhausted".into(),
						));
					}
					let backoff = retry_after.unwrap_or_else(|| {
						let exp = self.base_backoff * 2u32.saturating_pow(tries.saturating_sub(1));
						std::cmp::min(exp, self.max_backoff)
					});
					tokio::select! {
						_ = tokio::time::sleep(backoff) => {}
						_ = wait_cancelled(cancel) => {
							return Err(Error::Cancelled);
						}
					}
				}
			}
		}
	}
}

async fn wait_cancelled(cancel: &CancellationToken) {
	while !cancel.is_cancelled() {
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
}

//! Bounded exponential backoff with multiplicative jitter for transient network failures.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	config::serde_millis,
	error::ConfigError,
	obs::{self, EventLevel, FlowKind, FlowOutcome},
};

/// Immutable retry configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Retries allowed after the first attempt.
	pub max_attempts: u32,
	/// Delay before the first retry; doubles on every subsequent retry.
	#[serde(with = "serde_millis")]
	pub initial_delay: Duration,
	/// Upper bound on any single delay, jitter included.
	#[serde(with = "serde_millis")]
	pub max_delay: Duration,
	/// Multiplicative jitter ratio; a delay is scaled by a random factor in `[1 - j, 1 + j]`.
	pub jitter: f64,
}
impl RetryPolicy {
	const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
	const DEFAULT_JITTER: f64 = 0.2;
	const DEFAULT_MAX_ATTEMPTS: u32 = 3;
	const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5_000);

	/// Policy that never retries.
	pub fn no_retry() -> Self {
		Self { max_attempts: 0, ..Self::default() }
	}

	/// Overrides the retry budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the first delay.
	pub fn with_initial_delay(mut self, delay: Duration) -> Self {
		self.initial_delay = delay;

		self
	}

	/// Overrides the delay cap.
	pub fn with_max_delay(mut self, delay: Duration) -> Self {
		self.max_delay = delay;

		self
	}

	/// Overrides the jitter ratio.
	pub fn with_jitter(mut self, jitter: f64) -> Self {
		self.jitter = jitter;

		self
	}

	/// Returns true while `attempt` retries have not yet exhausted the budget.
	pub fn should_retry(&self, attempt: u32) -> bool {
		attempt < self.max_attempts
	}

	/// Un-jittered delay for the given retry (0-indexed): `min(max, initial * 2^attempt)`.
	pub fn base_delay(&self, attempt: u32) -> Duration {
		let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);

		self.initial_delay.checked_mul(multiplier).unwrap_or(self.max_delay).min(self.max_delay)
	}

	/// Checks the invariants a scheduler relies on.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_delay < self.initial_delay {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "max_delay must not be smaller than initial_delay",
			});
		}
		if !(0.0..=1.0).contains(&self.jitter) {
			return Err(ConfigError::InvalidRetryPolicy { reason: "jitter must be within [0, 1]" });
		}

		Ok(())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
			initial_delay: Self::DEFAULT_INITIAL_DELAY,
			max_delay: Self::DEFAULT_MAX_DELAY,
			jitter: Self::DEFAULT_JITTER,
		}
	}
}

/// What to do with a transient failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
	/// Wait `delay`, then resend.
	Retry {
		/// Jittered delay, never above the policy's `max_delay`.
		delay: Duration,
	},
	/// Budget exhausted; surface the error.
	GiveUp,
}

/// Applies a [`RetryPolicy`] to transient network failures.
#[derive(Clone, Debug, Default)]
pub struct RetryScheduler {
	policy: RetryPolicy,
}
impl RetryScheduler {
	/// Creates a scheduler for the provided policy.
	pub fn new(policy: RetryPolicy) -> Self {
		Self { policy }
	}

	/// Policy in effect.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Decides whether an operation that has already been retried `attempt` times may go again.
	pub fn decide(&self, attempt: u32) -> RetryDecision {
		if !self.policy.should_retry(attempt) {
			return RetryDecision::GiveUp;
		}

		RetryDecision::Retry { delay: self.jittered(self.policy.base_delay(attempt)) }
	}

	/// Runs `op`, retrying while it fails with a transient network error.
	///
	/// Any other error, or the last transient one once the budget is spent, is returned as is.
	pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 0;

		loop {
			let err = match op().await {
				Ok(value) => return Ok(value),
				Err(err) if err.is_transient_network() => err,
				Err(err) => return Err(err),
			};

			match self.decide(attempt) {
				RetryDecision::Retry { delay } => {
					self.pause(label, attempt, delay, &err).await;

					attempt += 1;
				},
				RetryDecision::GiveUp => return Err(err),
			}
		}
	}

	/// Logs and sleeps before retry number `attempt + 1`.
	pub(crate) async fn pause(&self, label: &str, attempt: u32, delay: Duration, err: &Error) {
		obs::record_flow_outcome(FlowKind::Retry, FlowOutcome::Attempt);
		obs::emit(
			EventLevel::Warn,
			FlowKind::Retry,
			"retrying after transient network failure",
			&format_args!(
				"{label}: retry {}/{} in {}ms: {err}",
				attempt + 1,
				self.policy.max_attempts,
				delay.as_millis()
			),
		);

		tokio::time::sleep(delay).await;
	}

	// Policies built without `validate` may carry any jitter; NaN and non-positive values disable
	// it and anything above 1 is clamped so the factor never goes negative.
	fn jittered(&self, base: Duration) -> Duration {
		let jitter = self.policy.jitter;

		if jitter.is_nan() || jitter <= 0.0 {
			return base;
		}

		let jitter = jitter.min(1.0);
		let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);

		base.mul_f64(factor).min(self.policy.max_delay)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{error::TransportError, http::Endpoint};

	#[test]
	fn defaults_match_documented_policy() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.max_attempts, 3);
		assert_eq!(policy.initial_delay, Duration::from_millis(1_000));
		assert_eq!(policy.max_delay, Duration::from_millis(5_000));
		assert!(policy.validate().is_ok());
	}

	#[test]
	fn base_delay_doubles_and_caps() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.base_delay(0), Duration::from_millis(1_000));
		assert_eq!(policy.base_delay(1), Duration::from_millis(2_000));
		assert_eq!(policy.base_delay(2), Duration::from_millis(4_000));
		assert_eq!(policy.base_delay(3), Duration::from_millis(5_000));
		assert_eq!(policy.base_delay(64), Duration::from_millis(5_000));
	}

	#[test]
	fn jittered_delays_stay_within_bounds() {
		let scheduler = RetryScheduler::new(RetryPolicy::default().with_jitter(0.5));

		for _ in 0..200 {
			for attempt in 0..3 {
				let RetryDecision::Retry { delay } = scheduler.decide(attempt) else {
					panic!("Attempt {attempt} should be retried.");
				};
				let base = scheduler.policy().base_delay(attempt);

				assert!(delay <= Duration::from_millis(5_000));
				assert!(delay >= base.mul_f64(0.5));
			}
		}
	}

	#[test]
	fn unvalidated_jitter_never_panics() {
		for jitter in [f64::NAN, -0.5, 3.0, f64::INFINITY] {
			let scheduler = RetryScheduler::new(RetryPolicy::default().with_jitter(jitter));

			for _ in 0..50 {
				let RetryDecision::Retry { delay } = scheduler.decide(1) else {
					panic!("Attempt 1 should be retried.");
				};

				assert!(delay <= Duration::from_millis(5_000), "Jitter {jitter}: {delay:?}.");
			}
		}
	}

	#[test]
	fn gives_up_after_budget() {
		let scheduler = RetryScheduler::new(RetryPolicy::default());

		assert_eq!(scheduler.decide(3), RetryDecision::GiveUp);
		assert_eq!(RetryScheduler::new(RetryPolicy::no_retry()).decide(0), RetryDecision::GiveUp);
	}

	#[test]
	fn validation_rejects_inverted_bounds_and_bad_jitter() {
		let inverted = RetryPolicy::default().with_max_delay(Duration::from_millis(10));

		assert!(matches!(inverted.validate(), Err(ConfigError::InvalidRetryPolicy { .. })));
		assert!(RetryPolicy::default().with_jitter(1.5).validate().is_err());
	}

	#[test]
	fn policy_serializes_delays_as_milliseconds() {
		let payload =
			serde_json::to_value(RetryPolicy::default()).expect("Policy should serialize.");

		assert_eq!(payload["initial_delay"], 1_000);
		assert_eq!(payload["max_delay"], 5_000);

		let parsed: RetryPolicy = serde_json::from_value(serde_json::json!({ "max_attempts": 5 }))
			.expect("Partial policy should fill defaults.");

		assert_eq!(parsed.max_attempts, 5);
		assert_eq!(parsed.initial_delay, Duration::from_millis(1_000));
	}

	#[tokio::test(start_paused = true)]
	async fn run_retries_only_transient_errors() {
		let scheduler = RetryScheduler::new(RetryPolicy::default().with_jitter(0.0));
		let started = tokio::time::Instant::now();
		let mut calls = 0;
		let result: Result<()> = scheduler
			.run("test", || {
				calls += 1;

				async { Err(TransportError::Timeout { endpoint: Endpoint::Csrf }.into()) }
			})
			.await;

		assert!(matches!(result, Err(Error::Transport(TransportError::Timeout { .. }))));
		assert_eq!(calls, 4);
		assert_eq!(started.elapsed(), Duration::from_millis(7_000));

		let mut calls = 0;
		let result: Result<()> = scheduler
			.run("test", || {
				calls += 1;

				async { Err(Error::SessionRejected { endpoint: Endpoint::Refresh }) }
			})
			.await;

		assert!(matches!(result, Err(Error::SessionRejected { .. })));
		assert_eq!(calls, 1);
	}
}

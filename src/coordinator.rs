//! Single-flight credential refresh.
//!
//! The coordinator owns one slot that is either idle or holds the current failure episode. The
//! first operation that needs a refresh while the slot is idle starts an episode; every other
//! operation that needs one while it is active attaches to it. The refresh runs on its own task,
//! so an operation that is dropped mid-wait never strands the episode, and the new credential is
//! written to the store before any waiter is released.
//!
//! A failed episode only answers requests that were sent before it settled. A request sent
//! afterwards that fails the same way starts a new episode. The credential write is guarded by
//! the generation the episode started from, so a session reset during the refresh wins.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	error::FailureKind,
	identity::CredentialRefresher,
	obs::{self, EventLevel, FlowKind, FlowSpan},
	store::{CompareAndSwapOutcome, CredentialStore},
};

/// How an episode ended, as seen by one waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
	/// The store now holds a credential newer than the one the failed request carried.
	Refreshed {
		/// Credential generation to replay with.
		generation: u64,
	},
	/// The refresh failed; the session cannot be recovered.
	Failed(FailureKind),
}

/// Observable coordinator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
	/// No refresh in flight.
	Idle,
	/// An episode is active; new reauth failures join it.
	Refreshing,
}

#[derive(Clone)]
struct Episode {
	settled: watch::Receiver<Option<Settlement>>,
}
impl Episode {
	// The sender lives in the refresh task; it is only gone early if that task panicked.
	fn is_abandoned(&self) -> bool {
		self.settled.has_changed().is_err() && self.settled.borrow().is_none()
	}
}

// Last failed episode. Only requests sent before it settled are answered from it.
#[derive(Clone, Copy)]
struct FailedEpisode {
	epoch: u64,
	generation: u64,
	kind: FailureKind,
}

enum Slot {
	Idle { failed: Option<FailedEpisode> },
	Refreshing(Episode),
}

struct Shared {
	slot: Slot,
	// Episodes settled so far.
	epoch: u64,
}

/// Deduplicates concurrent refreshes into a single call of a [`CredentialRefresher`].
pub struct RefreshCoordinator {
	refresher: Arc<dyn CredentialRefresher>,
	store: Arc<dyn CredentialStore>,
	shared: Arc<Mutex<Shared>>,
	metrics: Arc<RefreshMetrics>,
}
impl RefreshCoordinator {
	/// Creates an idle coordinator.
	pub fn new(refresher: Arc<dyn CredentialRefresher>, store: Arc<dyn CredentialStore>) -> Self {
		Self {
			refresher,
			store,
			shared: Arc::new(Mutex::new(Shared { slot: Slot::Idle { failed: None }, epoch: 0 })),
			metrics: Default::default(),
		}
	}

	/// Episode counters.
	pub fn metrics(&self) -> &Arc<RefreshMetrics> {
		&self.metrics
	}

	/// Current state of the slot.
	pub fn state(&self) -> CoordinatorState {
		match &self.shared.lock().slot {
			Slot::Idle { .. } => CoordinatorState::Idle,
			Slot::Refreshing(_) => CoordinatorState::Refreshing,
		}
	}

	/// Number of episodes settled so far.
	///
	/// Read it right before a request is authenticated and hand it back to
	/// [`RefreshCoordinator::await_refresh`] if that request needs a refresh.
	pub fn epoch(&self) -> u64 {
		self.shared.lock().epoch
	}

	/// Waits for a credential newer than `observed_generation`.
	///
	/// Returns immediately when the store already moved past that generation, or when the
	/// request was sent before the latest episode failed for that same generation. Otherwise
	/// joins the active episode, starting one if none is in flight, and resolves once it
	/// settles. Dropping the returned future only detaches this waiter.
	pub async fn await_refresh(&self, observed_generation: u64, observed_epoch: u64) -> Settlement {
		let (mut episode, sender) = {
			let mut shared = self.shared.lock();
			let current = self.store.snapshot().generation;

			if current != observed_generation {
				return Settlement::Refreshed { generation: current };
			}

			let active = match &shared.slot {
				Slot::Idle { failed: Some(failed) }
					if failed.generation == current && observed_epoch < failed.epoch =>
					return Settlement::Failed(failed.kind),
				Slot::Refreshing(episode) if !episode.is_abandoned() => Some(episode.clone()),
				_ => None,
			};

			match active {
				Some(episode) => {
					self.metrics.record_joined();
					obs::emit(
						EventLevel::Debug,
						FlowKind::Refresh,
						"joining in-flight refresh",
						&observed_generation,
					);

					(episode, None)
				},
				None => {
					let (sender, settled) = watch::channel(None);
					let episode = Episode { settled };

					shared.slot = Slot::Refreshing(episode.clone());

					(episode, Some(sender))
				},
			}
		};

		if let Some(sender) = sender {
			self.spawn_episode(observed_generation, sender);
		}

		match episode.settled.wait_for(Option::is_some).await {
			Ok(settled) => (*settled).unwrap_or(Settlement::Failed(FailureKind::RefreshExhausted)),
			Err(_) => Settlement::Failed(FailureKind::RefreshExhausted),
		}
	}

	fn spawn_episode(&self, generation: u64, sender: watch::Sender<Option<Settlement>>) {
		let refresher = self.refresher.clone();
		let store = self.store.clone();
		let shared = self.shared.clone();
		let metrics = self.metrics.clone();
		let span = FlowSpan::new(FlowKind::Refresh, "refresh_episode");

		metrics.record_attempt();
		tokio::spawn(span.instrument(async move {
			let outcome = refresher.refresh().await;
			let mut shared = shared.lock();

			shared.epoch += 1;

			let settlement = match outcome {
				Ok(credential) => {
					metrics.record_success();
					shared.slot = Slot::Idle { failed: None };

					match store.replace_credential_if(generation, credential) {
						CompareAndSwapOutcome::Updated { generation } =>
							Settlement::Refreshed { generation },
						CompareAndSwapOutcome::GenerationMismatch { current } => {
							obs::emit(
								EventLevel::Info,
								FlowKind::Refresh,
								"discarding refreshed credential after a session change",
								&current,
							);

							Settlement::Refreshed { generation: current }
						},
					}
				},
				Err(err) => {
					let kind = err.failure_kind();

					metrics.record_failure();
					obs::emit(EventLevel::Warn, FlowKind::Refresh, "credential refresh failed", &err);
					shared.slot = Slot::Idle {
						failed: Some(FailedEpisode { epoch: shared.epoch, generation, kind }),
					};

					Settlement::Failed(kind)
				},
			};

			// Waiters may all be gone; the slot is already idle either way.
			let _ = sender.send(Some(settlement));
		}));
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("state", &self.state())
			.field("metrics", &self.metrics)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::{
		auth::{Credential, TokenSecret},
		error::{ProtocolError, TransportError},
		http::Endpoint,
		identity::RefreshFuture,
		store::MemoryStore,
	};

	struct FakeRefresher {
		calls: AtomicUsize,
		delay: Duration,
		reply: fn(usize) -> Result<Credential>,
	}
	impl FakeRefresher {
		fn new(delay: Duration, reply: fn(usize) -> Result<Credential>) -> Arc<Self> {
			Arc::new(Self { calls: AtomicUsize::new(0), delay, reply })
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl CredentialRefresher for FakeRefresher {
		fn refresh(&self) -> RefreshFuture<'_> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			Box::pin(async move {
				tokio::time::sleep(self.delay).await;

				(self.reply)(call)
			})
		}
	}

	fn issue(call: usize) -> Result<Credential> {
		Ok(Credential::new(format!("T{}", call + 1)))
	}

	fn reject(_: usize) -> Result<Credential> {
		Err(Error::SessionRejected { endpoint: Endpoint::Refresh })
	}

	fn coordinator(refresher: Arc<FakeRefresher>, store: &MemoryStore) -> Arc<RefreshCoordinator> {
		Arc::new(RefreshCoordinator::new(refresher, Arc::new(store.clone())))
	}

	fn current_token(store: &MemoryStore) -> String {
		store
			.snapshot()
			.credential
			.map(|credential| credential.token.expose().to_owned())
			.unwrap_or_default()
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_waiters_share_one_refresh() {
		let store = MemoryStore::with_credential(Credential::new("T1"));
		let refresher = FakeRefresher::new(Duration::from_millis(50), issue);
		let coordinator = coordinator(refresher.clone(), &store);
		let waiters = (0..8)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.await_refresh(1, 0).await })
			})
			.collect::<Vec<_>>();

		for waiter in waiters {
			let settlement = waiter.await.expect("Waiter task should not panic.");

			assert_eq!(settlement, Settlement::Refreshed { generation: 2 });
			// The store is written before any waiter is released.
			assert_eq!(current_token(&store), "T2");
		}

		assert_eq!(refresher.calls(), 1);
		assert_eq!(coordinator.metrics().attempts(), 1);
		assert_eq!(coordinator.metrics().joined(), 7);
		assert_eq!(coordinator.state(), CoordinatorState::Idle);
	}

	#[tokio::test]
	async fn stale_generation_skips_refresh() {
		let store = MemoryStore::with_credential(Credential::new("T1"));
		let refresher = FakeRefresher::new(Duration::ZERO, issue);
		let coordinator = coordinator(refresher.clone(), &store);

		store.replace_credential(Credential::new("T9"));

		assert_eq!(coordinator.await_refresh(1, 0).await, Settlement::Refreshed { generation: 2 });
		assert_eq!(refresher.calls(), 0);
	}

	#[tokio::test]
	async fn failure_releases_every_waiter_and_answers_earlier_requests() {
		let store = MemoryStore::with_credential(Credential::new("T1"));
		let refresher = FakeRefresher::new(Duration::from_millis(10), reject);
		let coordinator = coordinator(refresher.clone(), &store);
		let (first, second) =
			tokio::join!(coordinator.await_refresh(1, 0), coordinator.await_refresh(1, 0));

		assert_eq!(first, Settlement::Failed(FailureKind::Reauthentication));
		assert_eq!(second, first);
		assert_eq!(coordinator.metrics().failures(), 1);
		assert_eq!(coordinator.epoch(), 1);

		// A request sent before the episode settled gets the same answer without a new refresh.
		assert_eq!(coordinator.await_refresh(1, 0).await, first);
		assert_eq!(refresher.calls(), 1);
		assert_eq!(current_token(&store), "T1");
	}

	#[tokio::test]
	async fn request_sent_after_a_failed_episode_starts_a_new_one() {
		fn flaky_then_ok(call: usize) -> Result<Credential> {
			match call {
				1 => Err(TransportError::Timeout { endpoint: Endpoint::Refresh }.into()),
				_ => Ok(Credential::new("T2")),
			}
		}

		let store = MemoryStore::with_credential(Credential::new("T1"));
		let refresher = FakeRefresher::new(Duration::ZERO, flaky_then_ok);
		let coordinator = coordinator(refresher.clone(), &store);
		let first = coordinator.await_refresh(1, coordinator.epoch()).await;

		assert_eq!(first, Settlement::Failed(FailureKind::RefreshExhausted));

		// Re-login through cookies leaves the credential generation untouched.
		store.replace_cookies(Some(TokenSecret::new("sid=new")));

		let second = coordinator.await_refresh(1, coordinator.epoch()).await;

		assert_eq!(second, Settlement::Refreshed { generation: 2 });
		assert_eq!(refresher.calls(), 2);
		assert_eq!(coordinator.metrics().attempts(), 2);
		assert_eq!(current_token(&store), "T2");
	}

	#[tokio::test(start_paused = true)]
	async fn session_reset_during_refresh_keeps_store_cleared() {
		let store = MemoryStore::with_credential(Credential::new("T1"));
		let refresher = FakeRefresher::new(Duration::from_millis(100), issue);
		let coordinator = coordinator(refresher.clone(), &store);
		let waiter = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.await_refresh(1, 0).await })
		};

		tokio::time::sleep(Duration::from_millis(10)).await;
		store.clear();

		let settlement = waiter.await.expect("Waiter task should not panic.");

		assert_eq!(settlement, Settlement::Refreshed { generation: 2 });
		assert!(store.snapshot().credential.is_none());
		assert_eq!(coordinator.state(), CoordinatorState::Idle);
		assert_eq!(refresher.calls(), 1);
	}

	#[tokio::test]
	async fn generic_failures_map_to_refresh_exhausted() {
		fn server_error(_: usize) -> Result<Credential> {
			Err(ProtocolError::UnexpectedStatus { endpoint: Endpoint::Refresh, status: 500 }.into())
		}

		let store = MemoryStore::with_credential(Credential::new("T1"));
		let coordinator = coordinator(FakeRefresher::new(Duration::ZERO, server_error), &store);

		assert_eq!(
			coordinator.await_refresh(1, 0).await,
			Settlement::Failed(FailureKind::RefreshExhausted)
		);
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_waiter_does_not_strand_episode() {
		let store = MemoryStore::with_credential(Credential::new("T1"));
		let refresher = FakeRefresher::new(Duration::from_millis(100), issue);
		let coordinator = coordinator(refresher.clone(), &store);
		let abandoned = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.await_refresh(1, 0).await })
		};

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(coordinator.state(), CoordinatorState::Refreshing);
		abandoned.abort();

		tokio::time::sleep(Duration::from_millis(200)).await;

		assert_eq!(coordinator.state(), CoordinatorState::Idle);
		assert_eq!(current_token(&store), "T2");
		assert_eq!(coordinator.await_refresh(1, 0).await, Settlement::Refreshed { generation: 2 });
		assert_eq!(refresher.calls(), 1);
	}
}

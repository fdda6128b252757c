//! Anti-forgery token acquisition (`GET /apollo-csrf`) and deduplicated CSRF repair.

// crates.io
use ::http::Method;
// self
use crate::{
	_prelude::*,
	auth::CsrfToken,
	error::ProtocolError,
	http::{Endpoint, GraphqlHttpClient, TransportErrorMapper},
	identity::IdentityClient,
	obs::{self, EventLevel, FlowKind, FlowOutcome, FlowSpan},
	store::CompareAndSwapOutcome,
};

/// Fetches fresh CSRF tokens from the identity service.
pub struct CsrfFetcher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	client: Arc<IdentityClient<C, M>>,
	repair_guard: AsyncMutex<()>,
}
impl<C, M> CsrfFetcher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a fetcher on top of a shared identity client.
	pub fn new(client: Arc<IdentityClient<C, M>>) -> Self {
		Self { client, repair_guard: AsyncMutex::new(()) }
	}

	/// Requests a new token; the endpoint must answer 2xx with a non-blank token header.
	///
	/// The store is not touched; callers decide where the token goes.
	pub async fn fetch(&self) -> Result<CsrfToken> {
		const KIND: FlowKind = FlowKind::Csrf;

		let span = FlowSpan::new(KIND, "fetch_csrf");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let client = self.client.as_ref();
				let response = client
					.call(Endpoint::Csrf, || client.request(Method::GET, &client.endpoints.csrf, None))
					.await?;
				let status = response.status();

				if !status.is_success() {
					return Err(Error::from(ProtocolError::UnexpectedStatus {
						endpoint: Endpoint::Csrf,
						status: status.as_u16(),
					}));
				}

				response
					.headers()
					.get(client.csrf_header())
					.and_then(|value| value.to_str().ok())
					.map(str::trim)
					.filter(|value| !value.is_empty())
					.map(CsrfToken::new)
					.ok_or_else(|| {
						Error::from(ProtocolError::MissingCsrfHeader {
							header: client.csrf_header().to_string(),
						})
					})
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Replaces the store's CSRF token unless another operation already did so since
	/// `observed_csrf_generation` was stamped on the failed request.
	///
	/// Concurrent repairs are serialized, so a burst of `FORBIDDEN` failures costs one fetch.
	/// A session reset that lands while the fetch is in flight keeps the cleared slot; the
	/// fetched token is dropped. Returns the CSRF generation the caller should replay with.
	pub async fn repair(&self, observed_csrf_generation: u64) -> Result<u64> {
		let _singleflight = self.repair_guard.lock().await;
		let current = self.client.store.snapshot().csrf_generation;

		if current != observed_csrf_generation {
			return Ok(current);
		}

		let token = self.fetch().await?;
		let outcome = self.client.store.replace_csrf_if(current, token);

		if let CompareAndSwapOutcome::GenerationMismatch { current } = outcome {
			obs::emit(
				EventLevel::Debug,
				FlowKind::Csrf,
				"discarding CSRF token fetched before a session change",
				&current,
			);
		}

		Ok(outcome.generation())
	}
}
impl<C, M> Debug for CsrfFetcher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CsrfFetcher").field("client", &self.client).finish()
	}
}

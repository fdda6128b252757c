//! Credential refresh against `POST /apollo-refresh`.
//!
//! A refresh always starts from a freshly fetched CSRF token because the refresh endpoint is
//! itself CSRF-protected. HTTP 401 is final; transient network failures of either call go
//! through the transport's retry policy.

// crates.io
use ::http::{Method, StatusCode};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	error::ProtocolError,
	http::{Endpoint, GraphqlHttpClient, TransportErrorMapper},
	identity::{CsrfFetcher, IdentityClient},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Boxed future returned by [`CredentialRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Source of fresh credentials driven by the refresh coordinator.
///
/// Implementations must not write the credential into the store; the coordinator does that
/// before releasing waiters.
pub trait CredentialRefresher
where
	Self: 'static + Send + Sync,
{
	/// Obtains a new credential.
	fn refresh(&self) -> RefreshFuture<'_>;
}

#[derive(Deserialize)]
struct RefreshBody {
	#[serde(alias = "accessToken", alias = "access_token")]
	token: String,
}

/// Identity-service backed [`CredentialRefresher`].
pub struct TokenRefresher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	client: Arc<IdentityClient<C, M>>,
	csrf: Arc<CsrfFetcher<C, M>>,
}
impl<C, M> TokenRefresher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a refresher sharing `client` and `csrf` with the rest of the transport.
	pub fn new(client: Arc<IdentityClient<C, M>>, csrf: Arc<CsrfFetcher<C, M>>) -> Self {
		Self { client, csrf }
	}

	/// Fetches a CSRF token, stores it, then exchanges the session for a new credential.
	///
	/// The token is stored only if the CSRF slot did not change while it was being fetched.
	///
	/// Errors:
	/// - [`Error::CsrfUnavailable`] when no CSRF token could be obtained;
	/// - [`Error::SessionRejected`] on HTTP 401 from the refresh endpoint;
	/// - [`ProtocolError::UnexpectedStatus`] on any other non-2xx status;
	/// - [`ProtocolError::ResponseParse`] or [`ProtocolError::EmptyCredential`] on a bad body.
	pub async fn refresh_credential(&self) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh_credential");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let observed_csrf_generation = self.client.store.snapshot().csrf_generation;
				let csrf = self
					.csrf
					.fetch()
					.await
					.map_err(|source| Error::CsrfUnavailable { source: Box::new(source) })?;

				self.client.store.replace_csrf_if(observed_csrf_generation, csrf.clone());

				let client = self.client.as_ref();
				let csrf = &csrf;
				let response = client
					.call(Endpoint::Refresh, || {
						client.request(Method::POST, &client.endpoints.refresh, Some(csrf))
					})
					.await?;
				let status = response.status();

				if status == StatusCode::UNAUTHORIZED {
					return Err(Error::SessionRejected { endpoint: Endpoint::Refresh });
				}
				if !status.is_success() {
					return Err(Error::from(ProtocolError::UnexpectedStatus {
						endpoint: Endpoint::Refresh,
						status: status.as_u16(),
					}));
				}

				let deserializer = &mut serde_json::Deserializer::from_slice(response.body());
				let body: RefreshBody =
					serde_path_to_error::deserialize(deserializer).map_err(|source| {
						ProtocolError::ResponseParse {
							endpoint: Endpoint::Refresh,
							source,
							status: Some(status.as_u16()),
						}
					})?;

				if body.token.trim().is_empty() {
					return Err(Error::from(ProtocolError::EmptyCredential));
				}

				Ok(Credential::new(body.token))
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}
impl<C, M> CredentialRefresher for TokenRefresher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn refresh(&self) -> RefreshFuture<'_> {
		Box::pin(self.refresh_credential())
	}
}
impl<C, M> Debug for TokenRefresher<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRefresher").field("client", &self.client).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		identity::test_support::*,
		retry::{RetryPolicy, RetryScheduler},
		store::{CredentialStore, MemoryStore},
	};

	fn refresher(
		replies: Vec<Reply>,
		store: &MemoryStore,
		retry: RetryScheduler,
	) -> (TokenRefresher<ScriptedClient, IoMapper>, Arc<ScriptedClient>) {
		let scripted = Arc::new(ScriptedClient::new(replies));
		let client = Arc::new(identity_client(scripted.clone(), Arc::new(store.clone()), retry));
		let csrf = Arc::new(CsrfFetcher::new(client.clone()));

		(TokenRefresher::new(client, csrf), scripted)
	}

	fn csrf_ok() -> Reply {
		Reply::Response(200, vec![("x-csrf-token", "c1")], String::new())
	}

	#[tokio::test]
	async fn refresh_sends_csrf_and_parses_credential() {
		let store = MemoryStore::default();
		let (refresher, scripted) = refresher(
			vec![csrf_ok(), Reply::Response(200, Vec::new(), r#"{"accessToken":"T2"}"#.into())],
			&store,
			RetryScheduler::default(),
		);
		let credential = refresher.refresh().await.expect("Refresh should succeed.");

		assert_eq!(credential.token.expose(), "T2");
		assert_eq!(store.snapshot().csrf_generation, 1);
		assert!(store.snapshot().credential.is_none());

		let requests = scripted.requests.lock();

		assert_eq!(requests.len(), 2);
		assert_eq!(requests[1].method(), Method::POST);
		assert_eq!(requests[1].uri(), "http://identity.test/apollo-refresh");
		assert_eq!(requests[1].headers()["x-csrf-token"], "c1");
	}

	#[tokio::test]
	async fn csrf_token_is_not_stored_across_a_session_reset() {
		let store = MemoryStore::default();
		let scripted = {
			let store = store.clone();

			Arc::new(
				ScriptedClient::new(vec![
					csrf_ok(),
					Reply::Response(200, Vec::new(), r#"{"token":"T2"}"#.into()),
				])
				.on_call(move |call| {
					if call == 1 {
						store.clear();
					}
				}),
			)
		};
		let client = Arc::new(identity_client(
			scripted.clone(),
			Arc::new(store.clone()),
			RetryScheduler::default(),
		));
		let refresher = TokenRefresher::new(client.clone(), Arc::new(CsrfFetcher::new(client)));

		refresher.refresh().await.expect("Refresh should still complete.");

		assert!(store.snapshot().csrf.is_none());
		assert_eq!(scripted.requests.lock()[1].headers()["x-csrf-token"], "c1");
	}

	#[tokio::test]
	async fn unauthorized_is_final() {
		let (refresher, scripted) = refresher(
			vec![csrf_ok(), Reply::Response(401, Vec::new(), String::new())],
			&MemoryStore::default(),
			RetryScheduler::default(),
		);
		let err = refresher.refresh().await.expect_err("HTTP 401 should fail the refresh.");

		assert!(matches!(err, Error::SessionRejected { endpoint: Endpoint::Refresh }));
		assert_eq!(scripted.calls(), 2);
	}

	#[tokio::test]
	async fn csrf_failure_prevents_refresh_call() {
		let (refresher, scripted) = refresher(
			vec![Reply::Response(403, Vec::new(), String::new())],
			&MemoryStore::default(),
			RetryScheduler::default(),
		);
		let err = refresher.refresh().await.expect_err("CSRF failure should abort the refresh.");

		assert!(matches!(err, Error::CsrfUnavailable { .. }));
		assert_eq!(scripted.calls(), 1);
	}

	#[tokio::test]
	async fn malformed_and_empty_bodies_are_protocol_errors() {
		let (refresher, _) = refresher(
			vec![
				csrf_ok(),
				Reply::Response(200, Vec::new(), r#"{"token":5}"#.into()),
				csrf_ok(),
				Reply::Response(200, Vec::new(), r#"{"token":"  "}"#.into()),
				csrf_ok(),
				Reply::Response(502, Vec::new(), String::new()),
			],
			&MemoryStore::default(),
			RetryScheduler::default(),
		);

		match refresher.refresh().await.expect_err("Numeric token should fail.") {
			Error::Protocol(ProtocolError::ResponseParse { source, .. }) => {
				assert_eq!(source.path().to_string(), "token");
			},
			other => panic!("Unexpected error variant: {other:?}."),
		}

		assert!(matches!(
			refresher.refresh().await,
			Err(Error::Protocol(ProtocolError::EmptyCredential))
		));
		assert!(matches!(
			refresher.refresh().await,
			Err(Error::Protocol(ProtocolError::UnexpectedStatus { status: 502, .. }))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn transient_refresh_failures_are_retried() {
		let (refresher, scripted) = refresher(
			vec![
				csrf_ok(),
				Reply::Refused,
				Reply::Response(200, Vec::new(), r#"{"token":"T3"}"#.into()),
			],
			&MemoryStore::default(),
			RetryScheduler::new(RetryPolicy::default().with_jitter(0.0)),
		);
		let credential = refresher.refresh().await.expect("Retry should recover the refresh.");

		assert_eq!(credential.token.expose(), "T3");
		assert_eq!(scripted.calls(), 3);
	}
}

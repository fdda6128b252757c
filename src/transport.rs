//! The caller-facing GraphQL pipeline.
//!
//! Every operation loops through authenticate → send → classify → recover until it resolves:
//! - `REAUTH` waits on the [`RefreshCoordinator`] and replays, or redirects to login;
//! - `CSRF_REPAIR` replaces the CSRF token and replays, or redirects to login;
//! - `FATAL_SERVER` redirects to the error page;
//! - `TRANSIENT_NETWORK` backs off through the [`RetryScheduler`] and resends;
//! - `APPLICATION_ERROR` is returned as [`Outcome::Rejected`].
//!
//! Each operation may be refreshed once and CSRF-repaired once; a second failure of the same
//! class redirects to login. Transient retries are counted separately against the retry policy.

// crates.io
use ::http::{
	HeaderMap, HeaderName, HeaderValue, Method,
	header::{ACCEPT, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	authenticator::RequestAuthenticator,
	classify::{DefaultErrorClassifier, ErrorClassifier, FailureContext, RecoveryAction},
	config::TransportConfig,
	coordinator::{RefreshCoordinator, Settlement},
	error::{ConfigError, FailureKind, ProtocolError, TransportError},
	graphql::{GraphqlError, GraphqlRequest, GraphqlResponse},
	http::{Endpoint, GraphqlHttpClient, HttpRequest, HttpResponse, TransportErrorMapper},
	identity::{CredentialRefresher, CsrfFetcher, IdentityClient, TokenRefresher},
	navigator::{Navigator, Redirect},
	obs::{self, EventLevel, FlowKind, FlowOutcome, FlowSpan},
	retry::{RetryDecision, RetryScheduler},
	store::CredentialStore,
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Transport specialized for the crate's default reqwest stack.
pub type ReqwestTransport = Transport<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Resolution of one operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T = Value> {
	/// Clean 2xx response; the `data` member.
	Data(T),
	/// Application-level rejection surfaced as data.
	Rejected(Rejection),
	/// The session or server could not be recovered; the navigator has already been called.
	Redirected(Redirect),
}
impl<T> Outcome<T> {
	/// Returns the payload of a successful operation.
	pub fn data(self) -> Option<T> {
		match self {
			Self::Data(data) => Some(data),
			_ => None,
		}
	}

	/// Returns the redirect performed for this operation, if any.
	pub fn redirect(&self) -> Option<&Redirect> {
		match self {
			Self::Redirected(redirect) => Some(redirect),
			_ => None,
		}
	}
}

/// Application errors returned by the server, with whatever partial data came along.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rejection {
	/// Structured errors, in response order.
	pub errors: Vec<GraphqlError>,
	/// Partial `data`, when present.
	pub data: Option<Value>,
	/// HTTP status of the response.
	pub status: Option<u16>,
}

/// One outbound request plus its replay bookkeeping.
#[derive(Clone, Debug)]
pub struct Operation {
	/// GraphQL payload.
	pub request: GraphqlRequest,
	/// Extra headers; auth headers are always overwritten at send time.
	pub headers: HeaderMap,
	/// Transient-network retries already performed.
	pub attempt: u32,
	/// Set once the operation has been replayed after a credential refresh.
	pub refreshed: bool,
	/// Set once the operation has been replayed after a CSRF repair.
	pub csrf_repaired: bool,
}
impl Operation {
	/// Wraps a request with fresh bookkeeping.
	pub fn new(request: GraphqlRequest) -> Self {
		Self {
			request,
			headers: HeaderMap::new(),
			attempt: 0,
			refreshed: false,
			csrf_repaired: false,
		}
	}

	/// Adds an extra request header.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}
}
impl From<GraphqlRequest> for Operation {
	fn from(request: GraphqlRequest) -> Self {
		Self::new(request)
	}
}

// What a failed attempt left behind, kept until the recovery action is known.
enum Failure {
	Response { status: u16, response: GraphqlResponse },
	Status(u16),
	Network(Error),
}
impl Failure {
	fn into_error(self) -> Error {
		match self {
			Self::Network(err) => err,
			Self::Response { status, .. } | Self::Status(status) =>
				TransportError::GatewayStatus { endpoint: Endpoint::Graphql, status }.into(),
		}
	}

	fn into_rejection(self) -> Result<Rejection> {
		match self {
			Self::Response { status, response } =>
				Ok(Rejection { errors: response.errors, data: response.data, status: Some(status) }),
			Self::Status(status) => Ok(Rejection { status: Some(status), ..Default::default() }),
			Self::Network(err) => Err(err),
		}
	}

	fn status(&self) -> Option<u16> {
		match self {
			Self::Response { status, .. } | Self::Status(status) => Some(*status),
			Self::Network(_) => None,
		}
	}
}

/// Authenticated GraphQL transport.
///
/// Owns the store, the refresh coordinator and the CSRF fetcher for one session; construct one
/// per session rather than sharing a global.
pub struct Transport<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	config: TransportConfig,
	store: Arc<dyn CredentialStore>,
	authenticator: RequestAuthenticator,
	classifier: Arc<dyn ErrorClassifier>,
	coordinator: RefreshCoordinator,
	csrf: Arc<CsrfFetcher<C, M>>,
	retry: RetryScheduler,
	navigator: Arc<dyn Navigator>,
}
impl<C, M> Transport<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a transport that reuses the caller-provided HTTP client + mapper pair.
	///
	/// The CSRF fetcher and the token refresher share the same client.
	pub fn with_http_client(
		config: TransportConfig,
		store: Arc<dyn CredentialStore>,
		navigator: Arc<dyn Navigator>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		config.validate()?;

		let csrf_header = HeaderName::from_bytes(config.csrf_header.as_bytes())
			.map_err(|_| ConfigError::InvalidHeaderName { name: config.csrf_header.clone() })?;
		let http_client = http_client.into();
		let transport_mapper = mapper.into();
		let retry = RetryScheduler::new(config.retry.clone());
		let identity = Arc::new(IdentityClient::new(
			http_client.clone(),
			transport_mapper.clone(),
			store.clone(),
			config.identity.clone(),
			csrf_header.clone(),
			config.identity_timeout,
			retry.clone(),
		));
		let csrf = Arc::new(CsrfFetcher::new(identity.clone()));
		let refresher: Arc<dyn CredentialRefresher> =
			Arc::new(TokenRefresher::new(identity, csrf.clone()));

		Ok(Self {
			http_client,
			transport_mapper,
			authenticator: RequestAuthenticator::new(store.clone(), csrf_header),
			classifier: Arc::new(DefaultErrorClassifier),
			coordinator: RefreshCoordinator::new(refresher, store.clone()),
			config,
			store,
			csrf,
			retry,
			navigator,
		})
	}

	/// Replaces the error classifier.
	pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
		self.classifier = classifier;

		self
	}

	/// Replaces the credential refresher; resets the coordinator.
	pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
		self.coordinator = RefreshCoordinator::new(refresher, self.store.clone());

		self
	}

	/// Configuration in effect.
	pub fn config(&self) -> &TransportConfig {
		&self.config
	}

	/// Session store.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Refresh coordinator (state and metrics).
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Drops the credential, CSRF token and cookies.
	pub fn reset_session(&self) {
		self.store.clear();
		obs::emit(EventLevel::Info, FlowKind::Operation, "session reset", &"store cleared");
	}

	/// Runs a GraphQL request to resolution.
	///
	/// Only infrastructure faults are `Err`: exhausted transient retries (the last network error,
	/// unmodified), an unparseable 2xx body, or a request that cannot be built.
	pub async fn execute(&self, request: GraphqlRequest) -> Result<Outcome> {
		self.execute_operation(Operation::new(request)).await
	}

	/// Like [`Transport::execute`], deserializing `data` into `T`.
	pub async fn execute_as<T>(&self, request: GraphqlRequest) -> Result<Outcome<T>>
	where
		T: DeserializeOwned,
	{
		Ok(match self.execute(request).await? {
			Outcome::Data(data) => Outcome::Data(
				serde_path_to_error::deserialize(data).map_err(|source| {
					ProtocolError::ResponseParse { endpoint: Endpoint::Graphql, source, status: None }
				})?,
			),
			Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
			Outcome::Redirected(redirect) => Outcome::Redirected(redirect),
		})
	}

	/// Runs a prepared [`Operation`] to resolution.
	pub async fn execute_operation(&self, operation: Operation) -> Result<Outcome> {
		const KIND: FlowKind = FlowKind::Operation;

		let span = FlowSpan::new(KIND, "execute_operation");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.drive(operation)).await;

		match &result {
			Ok(Outcome::Data(_)) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn drive(&self, mut operation: Operation) -> Result<Outcome> {
		let body = serde_json::to_vec(&operation.request)
			.map_err(|source| ProtocolError::RequestEncode { source })?;

		loop {
			let mut request = self.build_request(&operation, &body)?;
			let epoch = self.coordinator.epoch();
			let stamp = self.authenticator.authenticate(&mut request);
			let (ctx, failure) = match self.send(request).await {
				Ok(response) => {
					let status = response.status();
					let code = status.as_u16();

					match GraphqlResponse::from_slice(response.body(), Some(code)) {
						Ok(parsed) if status.is_success() && parsed.is_clean() =>
							return Ok(Outcome::Data(parsed.data.unwrap_or(Value::Null))),
						Ok(parsed) => (
							FailureContext::new().with_http_status(code).with_errors(&parsed.errors),
							Failure::Response { status: code, response: parsed },
						),
						Err(err) if status.is_success() => return Err(err.into()),
						Err(_) =>
							(FailureContext::new().with_http_status(code), Failure::Status(code)),
					}
				},
				Err(err) if err.is_transient_network() =>
					(FailureContext::network_failure(), Failure::Network(err)),
				Err(err) => return Err(err),
			};
			let action = self.classifier.classify(&ctx);

			obs::emit(
				EventLevel::Debug,
				FlowKind::Operation,
				"operation failed",
				&format_args!("{}: {action}", operation.request.label()),
			);

			match action {
				RecoveryAction::Reauth => {
					if operation.refreshed {
						return Ok(self.redirect(Redirect::login(
							&self.config.login_path,
							FailureKind::Reauthentication,
						)));
					}

					operation.refreshed = true;

					match self.coordinator.await_refresh(stamp.generation, epoch).await {
						Settlement::Refreshed { .. } => continue,
						Settlement::Failed(kind) =>
							return Ok(self.redirect(Redirect::login(&self.config.login_path, kind))),
					}
				},
				RecoveryAction::CsrfRepair => {
					if operation.csrf_repaired {
						return Ok(self.redirect(Redirect::login(
							&self.config.login_path,
							FailureKind::CsrfInvalid,
						)));
					}

					operation.csrf_repaired = true;

					if let Err(err) = self.csrf.repair(stamp.csrf_generation).await {
						obs::emit(EventLevel::Warn, FlowKind::Csrf, "CSRF repair failed", &err);

						return Ok(self.redirect(Redirect::login(
							&self.config.login_path,
							FailureKind::CsrfInvalid,
						)));
					}
				},
				RecoveryAction::FatalServer => {
					obs::emit(
						EventLevel::Error,
						FlowKind::Operation,
						"fatal server error",
						&format_args!(
							"{}: HTTP {}",
							operation.request.label(),
							failure.status().unwrap_or_default()
						),
					);

					return Ok(self.redirect(Redirect::error_page(
						&self.config.error_path,
						FailureKind::ServerFault,
					)));
				},
				RecoveryAction::TransientNetwork => {
					let err = failure.into_error();

					match self.retry.decide(operation.attempt) {
						RetryDecision::Retry { delay } => {
							self.retry
								.pause(operation.request.label(), operation.attempt, delay, &err)
								.await;

							operation.attempt += 1;
						},
						RetryDecision::GiveUp => return Err(err),
					}
				},
				RecoveryAction::ApplicationError =>
					return failure.into_rejection().map(Outcome::Rejected),
			}
		}
	}

	fn build_request(&self, operation: &Operation, body: &[u8]) -> Result<HttpRequest> {
		let mut request = ::http::Request::builder()
			.method(Method::POST)
			.uri(self.config.graphql_endpoint.as_str())
			.header(CONTENT_TYPE, "application/json")
			.header(ACCEPT, "application/graphql-response+json, application/json")
			.body(body.to_vec())
			.map_err(ConfigError::from)?;

		request.headers_mut().extend(operation.headers.clone());

		Ok(request)
	}

	async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
		self.http_client
			.execute(request)
			.await
			.map_err(|err| self.transport_mapper.map_transport_error(Endpoint::Graphql, err))
	}

	fn redirect(&self, redirect: Redirect) -> Outcome {
		obs::record_flow_outcome(FlowKind::Redirect, FlowOutcome::Attempt);
		obs::emit(EventLevel::Warn, FlowKind::Redirect, "redirecting", &redirect);
		self.navigator.navigate(&redirect);

		Outcome::Redirected(redirect)
	}
}
#[cfg(feature = "reqwest")]
impl Transport<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a transport backed by a default reqwest client.
	pub fn new(
		config: TransportConfig,
		store: Arc<dyn CredentialStore>,
		navigator: Arc<dyn Navigator>,
	) -> Result<Self> {
		Self::with_http_client(
			config,
			store,
			navigator,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for Transport<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Transport")
			.field("config", &self.config)
			.field("coordinator", &self.coordinator)
			.finish()
	}
}

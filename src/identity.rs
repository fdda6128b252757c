//! Identity service calls: CSRF token acquisition and credential refresh.
//!
//! Both endpoints share one [`IdentityClient`]: the same HTTP stack as the GraphQL pipeline,
//! session cookies forwarded from the store, a finite per-call deadline, and the transport's
//! retry policy for transient network failures.

pub mod csrf;
pub mod refresh;

pub use csrf::CsrfFetcher;
pub use refresh::{CredentialRefresher, RefreshFuture, TokenRefresher};

// crates.io
use ::http::{HeaderName, Method, header::ACCEPT};
// self
use crate::{
	_prelude::*,
	auth::CsrfToken,
	authenticator::{forward_cookies, set_secret},
	config::IdentityEndpoints,
	error::{ConfigError, TransportError},
	http::{Endpoint, GraphqlHttpClient, HttpRequest, HttpResponse, TransportErrorMapper},
	retry::RetryScheduler,
	store::CredentialStore,
};

/// Low-level client for the identity service endpoints.
pub struct IdentityClient<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client shared with the GraphQL pipeline.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
	/// Store providing the cookies forwarded on every identity call.
	pub store: Arc<dyn CredentialStore>,
	/// CSRF and refresh URLs.
	pub endpoints: IdentityEndpoints,
	csrf_header: HeaderName,
	timeout: Duration,
	retry: RetryScheduler,
}
impl<C, M> IdentityClient<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client; `timeout` bounds every single HTTP exchange.
	pub fn new(
		http_client: Arc<C>,
		transport_mapper: Arc<M>,
		store: Arc<dyn CredentialStore>,
		endpoints: IdentityEndpoints,
		csrf_header: HeaderName,
		timeout: Duration,
		retry: RetryScheduler,
	) -> Self {
		Self { http_client, transport_mapper, store, endpoints, csrf_header, timeout, retry }
	}

	/// Header carrying the CSRF token.
	pub fn csrf_header(&self) -> &HeaderName {
		&self.csrf_header
	}

	/// Builds a bodiless identity request with the session cookies and, optionally, a CSRF token.
	pub(crate) fn request(
		&self,
		method: Method,
		url: &Url,
		csrf: Option<&CsrfToken>,
	) -> Result<HttpRequest> {
		let mut request = ::http::Request::builder()
			.method(method)
			.uri(url.as_str())
			.header(ACCEPT, "application/json")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let headers = request.headers_mut();

		forward_cookies(headers, &self.store.snapshot());

		if let Some(token) = csrf {
			set_secret(headers, self.csrf_header.clone(), Some(token.expose().to_owned()));
		}

		Ok(request)
	}

	/// Sends the request produced by `build`, retrying transient network failures.
	///
	/// `build` runs once per attempt so each resend picks up the store's current cookies.
	pub(crate) async fn call<B>(&self, endpoint: Endpoint, build: B) -> Result<HttpResponse>
	where
		B: Sync + Fn() -> Result<HttpRequest>,
	{
		let build = &build;

		self.retry
			.run(endpoint.as_str(), move || async move {
				let request = build()?;

				self.send(endpoint, request).await
			})
			.await
	}

	async fn send(&self, endpoint: Endpoint, request: HttpRequest) -> Result<HttpResponse> {
		match tokio::time::timeout(self.timeout, self.http_client.execute(request)).await {
			Ok(Ok(response)) => Ok(response),
			Ok(Err(err)) => Err(self.transport_mapper.map_transport_error(endpoint, err)),
			Err(_) => Err(TransportError::Timeout { endpoint }.into()),
		}
	}
}
impl<C, M> Debug for IdentityClient<C, M>
where
	C: ?Sized + GraphqlHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdentityClient")
			.field("endpoints", &self.endpoints)
			.field("csrf_header", &self.csrf_header)
			.field("timeout", &self.timeout)
			.finish()
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	type CallHook = Box<dyn Fn(usize) + Send + Sync>;

	/// Scripted HTTP client: pops one canned reply per call and records every request.
	#[derive(Default)]
	pub(crate) struct ScriptedClient {
		pub(crate) replies: Mutex<Vec<Reply>>,
		pub(crate) requests: Mutex<Vec<HttpRequest>>,
		pub(crate) calls: AtomicUsize,
		hook: Option<CallHook>,
	}
	impl ScriptedClient {
		pub(crate) fn new(mut replies: Vec<Reply>) -> Self {
			replies.reverse();

			Self { replies: Mutex::new(replies), ..Self::default() }
		}

		// Runs `hook` with the 1-based call number while each request is being served.
		pub(crate) fn on_call(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
			self.hook = Some(Box::new(hook));

			self
		}

		pub(crate) fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl GraphqlHttpClient for ScriptedClient {
		type TransportError = std::io::Error;

		fn execute(&self, request: HttpRequest) -> crate::http::HttpFuture<'_, Self::TransportError> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			self.requests.lock().push(request);

			if let Some(hook) = &self.hook {
				hook(call);
			}

			let reply = self.replies.lock().pop();

			Box::pin(async move {
				match reply {
					Some(Reply::Response(status, headers, body)) => {
						let mut response = HttpResponse::new(body.into_bytes());

						*response.status_mut() =
							::http::StatusCode::from_u16(status).expect("Scripted status should be valid.");

						for (name, value) in headers {
							response.headers_mut().insert(
								HeaderName::from_static(name),
								::http::HeaderValue::from_static(value),
							);
						}

						Ok(response)
					},
					Some(Reply::Refused) | None => Err(std::io::Error::new(
						std::io::ErrorKind::ConnectionRefused,
						"connection refused",
					)),
				}
			})
		}
	}

	pub(crate) enum Reply {
		Response(u16, Vec<(&'static str, &'static str)>, String),
		Refused,
	}

	pub(crate) struct IoMapper;
	impl TransportErrorMapper<std::io::Error> for IoMapper {
		fn map_transport_error(&self, endpoint: Endpoint, error: std::io::Error) -> Error {
			TransportError::network(endpoint, error).into()
		}
	}

	pub(crate) fn identity_client(
		client: Arc<ScriptedClient>,
		store: Arc<dyn CredentialStore>,
		retry: RetryScheduler,
	) -> IdentityClient<ScriptedClient, IoMapper> {
		let endpoints = IdentityEndpoints::from_base(
			&Url::parse("http://identity.test/").expect("Base URL should parse."),
		)
		.expect("Endpoints should join.");

		IdentityClient::new(
			client,
			Arc::new(IoMapper),
			store,
			endpoints,
			HeaderName::from_static("x-csrf-token"),
			Duration::from_secs(2),
			retry,
		)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::{test_support::*, *};
	use crate::{auth::TokenSecret, retry::RetryPolicy, store::MemoryStore};

	#[test]
	fn requests_forward_cookies_and_csrf() {
		let store = MemoryStore::default();

		store.replace_cookies(Some(TokenSecret::new("sid=abc")));

		let client = identity_client(
			Arc::new(ScriptedClient::default()),
			Arc::new(store),
			RetryScheduler::default(),
		);
		let request = client
			.request(Method::POST, &client.endpoints.refresh, Some(&CsrfToken::new("c1")))
			.expect("Identity request should build.");

		assert_eq!(request.method(), Method::POST);
		assert_eq!(request.uri(), "http://identity.test/apollo-refresh");
		assert_eq!(request.headers()["cookie"], "sid=abc");
		assert_eq!(request.headers()["x-csrf-token"], "c1");
	}

	#[tokio::test(start_paused = true)]
	async fn call_retries_transient_failures_then_succeeds() {
		let scripted = Arc::new(ScriptedClient::new(vec![
			Reply::Refused,
			Reply::Response(200, Vec::new(), String::new()),
		]));
		let client = identity_client(
			scripted.clone(),
			Arc::new(MemoryStore::default()),
			RetryScheduler::new(RetryPolicy::default().with_jitter(0.0)),
		);
		let response = client
			.call(Endpoint::Csrf, || client.request(Method::GET, &client.endpoints.csrf, None))
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(response.status(), 200);
		assert_eq!(scripted.calls(), 2);
	}
}

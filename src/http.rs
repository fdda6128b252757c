//! Transport primitives shared by the GraphQL pipeline and the identity calls.
//!
//! [`GraphqlHttpClient`] is the crate's only dependency on an HTTP stack: it executes a fully
//! built [`HttpRequest`] and hands back the raw [`HttpResponse`]. [`TransportErrorMapper`]
//! turns the stack's own error type into the crate taxonomy so the classifier can decide what is
//! a transient network failure and what is a local configuration fault.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::{ConfigError, TransportError};

/// Request type dispatched by [`GraphqlHttpClient`].
pub type HttpRequest = ::http::Request<Vec<u8>>;
/// Response type returned by [`GraphqlHttpClient`].
pub type HttpResponse = ::http::Response<Vec<u8>>;
/// Boxed future returned by [`GraphqlHttpClient::execute`].
pub type HttpFuture<'a, E> =
	Pin<Box<dyn Future<Output = std::result::Result<HttpResponse, E>> + 'a + Send>>;

/// Upstream endpoints the transport talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
	/// GraphQL-over-HTTP endpoint.
	Graphql,
	/// Identity service CSRF endpoint (`GET /apollo-csrf`).
	Csrf,
	/// Identity service refresh endpoint (`POST /apollo-refresh`).
	Refresh,
}
impl Endpoint {
	/// Returns a stable label suitable for messages and span fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Graphql => "graphql",
			Self::Csrf => "csrf",
			Self::Refresh => "refresh",
		}
	}
}
impl Display for Endpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Abstraction over HTTP stacks able to execute the transport's requests.
///
/// Implementations must be `Send + Sync + 'static` so a single client can be shared by the
/// pipeline, the CSRF fetcher, and the refresh task spawned by the coordinator. The returned
/// future must own whatever it needs so it stays `Send` while in flight.
pub trait GraphqlHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Sends `request` and resolves once the full response body has been read.
	///
	/// Non-2xx statuses are responses, not errors; only failures to complete the exchange
	/// (connect, DNS, TLS, timeout, body read) surface as `Err`.
	fn execute(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError>;
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an error emitted by the transport while calling `endpoint`.
	fn map_transport_error(&self, endpoint: Endpoint, error: E) -> Error;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Redirects returned by the identity service are part of its contract (401 vs. success), so a
/// custom client passed through [`ReqwestHttpClient::with_client`] should not follow them.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl GraphqlHttpClient for ReqwestHttpClient {
	type TransportError = ReqwestError;

	fn execute(&self, request: HttpRequest) -> HttpFuture<'_, Self::TransportError> {
		let client = self.0.clone();

		Box::pin(async move {
			let response = client.execute(request.try_into()?).await?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let mut response_new = HttpResponse::new(response.bytes().await?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(&self, endpoint: Endpoint, err: ReqwestError) -> Error {
		if err.is_builder() {
			return ConfigError::from(err).into();
		}
		if err.is_timeout() {
			return TransportError::Timeout { endpoint }.into();
		}

		TransportError::network(endpoint, err).into()
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;

	#[test]
	fn endpoint_labels_are_stable() {
		assert_eq!(Endpoint::Graphql.to_string(), "graphql");
		assert_eq!(Endpoint::Csrf.as_str(), "csrf");
		assert_eq!(
			serde_json::to_string(&Endpoint::Refresh).expect("Endpoint should serialize."),
			"\"refresh\""
		);
	}

	#[tokio::test]
	async fn connection_refused_maps_to_transient_network() {
		let client = ReqwestHttpClient::default();
		let request = ::http::Request::post("http://127.0.0.1:9/graphql")
			.body(Vec::new())
			.expect("Request fixture should build.");
		let err = client.execute(request).await.expect_err("Port 9 should refuse connections.");
		let mapped = ReqwestTransportErrorMapper.map_transport_error(Endpoint::Graphql, err);

		assert!(mapped.is_transient_network(), "Unexpected mapping: {mapped:?}.");
	}
}

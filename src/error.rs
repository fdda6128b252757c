//! Transport-level error types shared across the pipeline, identity calls, and configuration.

// self
use crate::{_prelude::*, http::Endpoint};

/// Transport-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical transport error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout); safe to retry with backoff.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Upstream replied with a payload or status the pipeline cannot interpret.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),

	/// Identity service definitively rejected the session (HTTP 401 on refresh).
	#[error("The {endpoint} endpoint rejected the session.")]
	SessionRejected {
		/// Identity endpoint that answered 401.
		endpoint: Endpoint,
	},
	/// A fresh CSRF token could not be obtained, so no credential refresh was possible.
	#[error("Unable to obtain a CSRF token.")]
	CsrfUnavailable {
		/// Underlying CSRF fetch failure.
		#[source]
		source: Box<Error>,
	},
}
impl Error {
	/// Returns true when the failure is a transport-level hiccup worth retrying.
	pub fn is_transient_network(&self) -> bool {
		matches!(self, Self::Transport(_))
	}

	/// Maps an identity-call failure onto the failure taxonomy used for redirects and logs.
	pub fn failure_kind(&self) -> FailureKind {
		match self {
			Self::SessionRejected { .. } => FailureKind::Reauthentication,
			Self::CsrfUnavailable { .. } => FailureKind::CsrfInvalid,
			_ => FailureKind::RefreshExhausted,
		}
	}
}

/// Configuration and validation failures raised while building a transport.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] ::http::Error),
	/// Endpoint URL could not be parsed or joined.
	#[error("The {endpoint} endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Endpoints must use HTTP(S).
	#[error("The {endpoint} endpoint must use http or https: {url}.")]
	UnsupportedScheme {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Required endpoint was never configured.
	#[error("Missing {endpoint} endpoint.")]
	MissingEndpoint {
		/// Which endpoint is missing.
		endpoint: &'static str,
	},
	/// Retry policy values are inconsistent.
	#[error("Invalid retry policy: {reason}.")]
	InvalidRetryPolicy {
		/// Human-readable reason.
		reason: &'static str,
	},
	/// Identity calls need a finite, non-zero timeout.
	#[error("Identity timeout must be greater than zero.")]
	ZeroIdentityTimeout,
	/// Redirect paths must be absolute.
	#[error("Redirect path `{path}` must start with '/'.")]
	InvalidRedirectPath {
		/// Offending path.
		path: String,
	},
	/// CSRF header name is not a valid HTTP header name.
	#[error("CSRF header name `{name}` is invalid.")]
	InvalidHeaderName {
		/// Offending header name.
		name: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, gateway); the transient-network family.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the {endpoint} endpoint.")]
	Network {
		/// Endpoint being called.
		endpoint: Endpoint,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call did not complete within its deadline.
	#[error("Request to the {endpoint} endpoint timed out.")]
	Timeout {
		/// Endpoint being called.
		endpoint: Endpoint,
	},
	/// Upstream gateway answered 502/503/504 without a GraphQL payload.
	#[error("The {endpoint} endpoint is unavailable (HTTP {status}).")]
	GatewayStatus {
		/// Endpoint being called.
		endpoint: Endpoint,
		/// HTTP status code.
		status: u16,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during transport.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(endpoint: Endpoint, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { endpoint, source: Box::new(src) }
	}
}

/// Payload or status problems reported by upstream services.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
	/// Response body is not the JSON shape the endpoint promises.
	#[error("The {endpoint} endpoint returned malformed JSON.")]
	ResponseParse {
		/// Endpoint being called.
		endpoint: Endpoint,
		/// Structured parsing failure with the offending JSON path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Endpoint returned a non-success status outside the documented contract.
	#[error("The {endpoint} endpoint returned HTTP {status}.")]
	UnexpectedStatus {
		/// Endpoint being called.
		endpoint: Endpoint,
		/// HTTP status code.
		status: u16,
	},
	/// GraphQL request payload could not be encoded.
	#[error("GraphQL request could not be encoded.")]
	RequestEncode {
		/// Underlying serialization failure.
		#[source]
		source: serde_json::Error,
	},
	/// Refresh endpoint answered 2xx with a blank credential.
	#[error("The refresh endpoint returned an empty credential.")]
	EmptyCredential,
	/// CSRF endpoint succeeded but omitted the token header.
	#[error("The CSRF endpoint response is missing the `{header}` header.")]
	MissingCsrfHeader {
		/// Header that was expected.
		header: String,
	},
}

/// Failure taxonomy used to label redirects, logs, and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
	/// Credential invalid or expired.
	Reauthentication,
	/// Anti-forgery token missing or invalid.
	CsrfInvalid,
	/// Unrecoverable server-side fault.
	ServerFault,
	/// Transport could not complete the request.
	NetworkTransient,
	/// Application-level rejection, surfaced as data.
	ApplicationLevel,
	/// Credential refresh failed after its own attempts.
	RefreshExhausted,
}
impl FailureKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Reauthentication => "reauthentication",
			Self::CsrfInvalid => "csrf_invalid",
			Self::ServerFault => "server_fault",
			Self::NetworkTransient => "network_transient",
			Self::ApplicationLevel => "application_level",
			Self::RefreshExhausted => "refresh_exhausted",
		}
	}
}
impl Display for FailureKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

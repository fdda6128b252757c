//! Validated transport configuration and its builder.

// self
use crate::{_prelude::*, error::ConfigError, retry::RetryPolicy};

/// Identity service endpoints used for CSRF and credential refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEndpoints {
	/// `GET` endpoint whose response carries the CSRF token header.
	pub csrf: Url,
	/// `POST` endpoint exchanging the session for a fresh credential.
	pub refresh: Url,
}
impl IdentityEndpoints {
	/// Relative path of the CSRF endpoint.
	pub const CSRF_PATH: &'static str = "apollo-csrf";
	/// Relative path of the refresh endpoint.
	pub const REFRESH_PATH: &'static str = "apollo-refresh";

	/// Derives both endpoints from the identity service's base URL.
	pub fn from_base(base: &Url) -> Result<Self, ConfigError> {
		let csrf = base
			.join(Self::CSRF_PATH)
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "csrf", source })?;
		let refresh = base
			.join(Self::REFRESH_PATH)
			.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "refresh", source })?;

		Ok(Self { csrf, refresh })
	}
}

/// Immutable configuration consumed by [`Transport`](crate::transport::Transport).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
	/// GraphQL-over-HTTP endpoint.
	pub graphql_endpoint: Url,
	/// Identity service endpoints.
	pub identity: IdentityEndpoints,
	/// Backoff policy for transient network failures.
	#[serde(default)]
	pub retry: RetryPolicy,
	/// Deadline applied to each CSRF and refresh call.
	#[serde(default = "default_identity_timeout", with = "serde_millis")]
	pub identity_timeout: Duration,
	/// Redirect target for expired sessions.
	#[serde(default = "default_login_path")]
	pub login_path: String,
	/// Redirect target for fatal server faults.
	#[serde(default = "default_error_path")]
	pub error_path: String,
	/// Header carrying the CSRF token on requests and on the CSRF endpoint's response.
	#[serde(default = "default_csrf_header")]
	pub csrf_header: String,
}
impl TransportConfig {
	/// Default deadline for identity calls.
	pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

	/// Creates a new builder.
	pub fn builder() -> TransportConfigBuilder {
		TransportConfigBuilder::default()
	}

	/// Checks every invariant [`TransportConfigBuilder::build`] enforces; useful after
	/// deserializing a config from a file.
	pub fn validate(&self) -> Result<(), ConfigError> {
		validate_endpoint("graphql", &self.graphql_endpoint)?;
		validate_endpoint("csrf", &self.identity.csrf)?;
		validate_endpoint("refresh", &self.identity.refresh)?;
		self.retry.validate()?;

		if self.identity_timeout.is_zero() {
			return Err(ConfigError::ZeroIdentityTimeout);
		}

		validate_path(&self.login_path)?;
		validate_path(&self.error_path)?;

		if ::http::HeaderName::from_bytes(self.csrf_header.as_bytes()).is_err() {
			return Err(ConfigError::InvalidHeaderName { name: self.csrf_header.clone() });
		}

		Ok(())
	}
}

/// Builder for [`TransportConfig`] values.
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
	/// GraphQL endpoint (required).
	pub graphql_endpoint: Option<Url>,
	/// Identity endpoints (required).
	pub identity: Option<IdentityEndpoints>,
	/// Retry policy; defaults to [`RetryPolicy::default`].
	pub retry: Option<RetryPolicy>,
	/// Identity call deadline; defaults to 10 seconds.
	pub identity_timeout: Option<Duration>,
	/// Login redirect path; defaults to `/login`.
	pub login_path: Option<String>,
	/// Error page redirect path; defaults to `/500-error`.
	pub error_path: Option<String>,
	/// CSRF header name; defaults to `X-CSRF-TOKEN`.
	pub csrf_header: Option<String>,
}
impl TransportConfigBuilder {
	/// Sets the GraphQL endpoint.
	pub fn graphql_endpoint(mut self, url: Url) -> Self {
		self.graphql_endpoint = Some(url);

		self
	}

	/// Derives `/apollo-csrf` and `/apollo-refresh` from the identity service base URL.
	pub fn identity_base(mut self, base: &Url) -> Result<Self, ConfigError> {
		self.identity = Some(IdentityEndpoints::from_base(base)?);

		Ok(self)
	}

	/// Sets both identity endpoints explicitly.
	pub fn identity_endpoints(mut self, endpoints: IdentityEndpoints) -> Self {
		self.identity = Some(endpoints);

		self
	}

	/// Overrides the retry policy.
	pub fn retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = Some(policy);

		self
	}

	/// Overrides the identity call deadline.
	pub fn identity_timeout(mut self, timeout: Duration) -> Self {
		self.identity_timeout = Some(timeout);

		self
	}

	/// Overrides the login redirect path.
	pub fn login_path(mut self, path: impl Into<String>) -> Self {
		self.login_path = Some(path.into());

		self
	}

	/// Overrides the error page redirect path.
	pub fn error_path(mut self, path: impl Into<String>) -> Self {
		self.error_path = Some(path.into());

		self
	}

	/// Overrides the CSRF header name.
	pub fn csrf_header(mut self, name: impl Into<String>) -> Self {
		self.csrf_header = Some(name.into());

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<TransportConfig, ConfigError> {
		let graphql_endpoint =
			self.graphql_endpoint.ok_or(ConfigError::MissingEndpoint { endpoint: "graphql" })?;
		let identity = self.identity.ok_or(ConfigError::MissingEndpoint { endpoint: "identity" })?;
		let config = TransportConfig {
			graphql_endpoint,
			identity,
			retry: self.retry.unwrap_or_default(),
			identity_timeout: self.identity_timeout.unwrap_or_else(default_identity_timeout),
			login_path: self.login_path.unwrap_or_else(default_login_path),
			error_path: self.error_path.unwrap_or_else(default_error_path),
			csrf_header: self.csrf_header.unwrap_or_else(default_csrf_header),
		};

		config.validate()?;

		Ok(config)
	}
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub(crate) mod serde_millis {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	// self
	use crate::_prelude::Duration;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

fn default_identity_timeout() -> Duration {
	TransportConfig::DEFAULT_IDENTITY_TIMEOUT
}

fn default_login_path() -> String {
	"/login".into()
}

fn default_error_path() -> String {
	"/500-error".into()
}

fn default_csrf_header() -> String {
	"X-CSRF-TOKEN".into()
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ConfigError> {
	match url.scheme() {
		"http" | "https" => Ok(()),
		_ => Err(ConfigError::UnsupportedScheme { endpoint: name, url: url.to_string() }),
	}
}

fn validate_path(path: &str) -> Result<(), ConfigError> {
	if path.starts_with('/') {
		Ok(())
	} else {
		Err(ConfigError::InvalidRedirectPath { path: path.to_owned() })
	}
}

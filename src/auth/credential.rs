//! Bearer credential and CSRF token value types.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Bearer credential authenticating GraphQL requests.
///
/// Expiry is never evaluated locally; the server decides by rejecting the credential with
/// `UNAUTHENTICATED`. `obtained_at` is kept for diagnostics only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Opaque bearer token.
	pub token: TokenSecret,
	/// Instant the credential entered the store.
	#[serde(with = "time::serde::rfc3339")]
	pub obtained_at: OffsetDateTime,
}
impl Credential {
	/// Wraps a bearer token obtained now.
	pub fn new(token: impl Into<String>) -> Self {
		Self { token: TokenSecret::new(token), obtained_at: OffsetDateTime::now_utc() }
	}

	/// Overrides the acquisition instant.
	pub fn with_obtained_at(mut self, instant: OffsetDateTime) -> Self {
		self.obtained_at = instant;

		self
	}

	/// Renders the `Authorization` header value.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.token.expose())
	}
}

/// Anti-forgery token scoped to the current session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsrfToken(TokenSecret);
impl CsrfToken {
	/// Wraps a token value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(TokenSecret::new(value))
	}

	/// Returns the raw header value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		self.0.expose()
	}
}

//! Per-request credential injection.
//!
//! [`RequestAuthenticator::authenticate`] reads the store at the moment a request is about to be
//! dispatched, never when the operation is constructed, so a replay after a refresh always
//! carries the values written by that refresh.

// crates.io
use ::http::{
	HeaderMap, HeaderName, HeaderValue,
	header::{AUTHORIZATION, COOKIE},
};
// self
use crate::{
	_prelude::*,
	http::HttpRequest,
	obs::{self, EventLevel, FlowKind},
	store::{CredentialStore, SessionSnapshot},
};

/// Store generations observed when a request was authenticated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthStamp {
	/// Credential generation attached to the request.
	pub generation: u64,
	/// CSRF generation attached to the request.
	pub csrf_generation: u64,
}

/// Attaches the current bearer credential, CSRF token and session cookies to outbound requests.
#[derive(Clone)]
pub struct RequestAuthenticator {
	store: Arc<dyn CredentialStore>,
	csrf_header: HeaderName,
}
impl RequestAuthenticator {
	/// Creates an authenticator reading from `store`.
	pub fn new(store: Arc<dyn CredentialStore>, csrf_header: HeaderName) -> Self {
		Self { store, csrf_header }
	}

	/// Name of the CSRF header.
	pub fn csrf_header(&self) -> &HeaderName {
		&self.csrf_header
	}

	/// Overwrites the request's auth headers with the store's current values.
	///
	/// Slots that are empty in the store are removed from the request, so a replay after a
	/// session reset never resends stale secrets. This step cannot fail: a value that is not a
	/// legal header is skipped and logged.
	pub fn authenticate(&self, request: &mut HttpRequest) -> AuthStamp {
		let snapshot = self.store.snapshot();
		let headers = request.headers_mut();

		set_secret(headers, AUTHORIZATION, snapshot.credential.as_ref().map(|c| c.bearer()));
		set_secret(
			headers,
			self.csrf_header.clone(),
			snapshot.csrf.as_ref().map(|token| token.expose().to_owned()),
		);
		forward_cookies(headers, &snapshot);

		AuthStamp { generation: snapshot.generation, csrf_generation: snapshot.csrf_generation }
	}
}
impl Debug for RequestAuthenticator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestAuthenticator").field("csrf_header", &self.csrf_header).finish()
	}
}

/// Copies the session cookie header from `snapshot`, if any, onto `headers`.
pub(crate) fn forward_cookies(headers: &mut HeaderMap, snapshot: &SessionSnapshot) {
	set_secret(headers, COOKIE, snapshot.cookies.as_ref().map(|cookies| cookies.expose().to_owned()));
}

/// Inserts a sensitive header, or removes it when `value` is absent.
pub(crate) fn set_secret(headers: &mut HeaderMap, name: HeaderName, value: Option<String>) {
	let Some(value) = value else {
		headers.remove(&name);

		return;
	};

	match HeaderValue::from_str(&value) {
		Ok(mut header) => {
			header.set_sensitive(true);
			headers.insert(name, header);
		},
		Err(_) => {
			headers.remove(&name);
			obs::emit(
				EventLevel::Warn,
				FlowKind::Operation,
				"skipping header with characters outside the HTTP value grammar",
				&name,
			);
		},
	}
}

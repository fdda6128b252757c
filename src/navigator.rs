//! Redirect seam for unrecoverable failures.
//!
//! The pipeline decides *where* to go; a [`Navigator`] decides *how* (client-side routing,
//! an HTTP redirect, a message to a UI thread). The transport calls it at most once per
//! operation and then returns [`Outcome::Redirected`](crate::transport::Outcome::Redirected).

// self
use crate::{
	_prelude::*,
	error::FailureKind,
	obs::{self, EventLevel, FlowKind},
};

/// Environment hook performing redirects.
pub trait Navigator: Send + Sync {
	/// Sends the user to `redirect.path`.
	fn navigate(&self, redirect: &Redirect);
}

/// Redirect surfaces known to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
	/// Sign-in page; the session is gone.
	Login,
	/// Dedicated server-fault page.
	ErrorPage,
}

/// Redirect instruction handed to a [`Navigator`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
	/// Which surface the path points at.
	pub destination: Destination,
	/// Absolute application path, e.g. `/login`.
	pub path: String,
	/// Failure that forced the redirect.
	pub cause: FailureKind,
}
impl Redirect {
	/// Redirect to the sign-in page.
	pub fn login(path: impl Into<String>, cause: FailureKind) -> Self {
		Self { destination: Destination::Login, path: path.into(), cause }
	}

	/// Redirect to the server-fault page.
	pub fn error_page(path: impl Into<String>, cause: FailureKind) -> Self {
		Self { destination: Destination::ErrorPage, path: path.into(), cause }
	}
}
impl Display for Redirect {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{} ({})", self.path, self.cause)
	}
}

/// Navigator that only logs; useful for headless callers that act on
/// [`Outcome::Redirected`](crate::transport::Outcome::Redirected) themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;
impl Navigator for NoopNavigator {
	fn navigate(&self, redirect: &Redirect) {
		obs::emit(EventLevel::Info, FlowKind::Redirect, "redirect requested", redirect);
	}
}

/// Navigator that remembers every redirect it was asked to perform.
#[derive(Debug, Default)]
pub struct RecordingNavigator(Mutex<Vec<Redirect>>);
impl RecordingNavigator {
	/// Redirects recorded so far, oldest first.
	pub fn redirects(&self) -> Vec<Redirect> {
		self.0.lock().clone()
	}

	/// Paths recorded so far, oldest first.
	pub fn paths(&self) -> Vec<String> {
		self.0.lock().iter().map(|redirect| redirect.path.clone()).collect()
	}
}
impl Navigator for RecordingNavigator {
	fn navigate(&self, redirect: &Redirect) {
		self.0.lock().push(redirect.clone());
	}
}

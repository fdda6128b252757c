//! Credential store contract and the built-in in-memory implementation.
//!
//! The store is the only place the bearer credential, CSRF token, and forwarded session cookies
//! live. Every replacement of the credential or CSRF token bumps a generation counter, letting the
//! pipeline tell whether a failure was observed against values that have since been replaced.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Credential, CsrfToken, TokenSecret},
};

/// Storage contract for the session's mutable secrets.
///
/// Reads are synchronous so the authenticator can take a fresh snapshot right before each
/// request is dispatched.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns a consistent copy of every slot plus the current generations.
	fn snapshot(&self) -> SessionSnapshot;

	/// Replaces the bearer credential and returns the new credential generation.
	fn replace_credential(&self, credential: Credential) -> u64;

	/// Replaces the CSRF token and returns the new CSRF generation.
	fn replace_csrf(&self, token: CsrfToken) -> u64;

	/// Replaces the credential only while the credential generation still equals `expected`.
	///
	/// Used by writers that fetched the credential across a suspension point, so a session reset
	/// or a concurrent replacement in the meantime wins over the late write.
	fn replace_credential_if(&self, expected: u64, credential: Credential) -> CompareAndSwapOutcome;

	/// Replaces the CSRF token only while the CSRF generation still equals `expected`.
	fn replace_csrf_if(&self, expected: u64, token: CsrfToken) -> CompareAndSwapOutcome;

	/// Replaces (or clears) the session cookie header forwarded to upstream services.
	fn replace_cookies(&self, cookies: Option<TokenSecret>);

	/// Drops every secret, starting a new session. Generations keep increasing.
	fn clear(&self);
}

/// Result of a generation-guarded replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The generation matched and the value was written.
	Updated {
		/// Generation after the write.
		generation: u64,
	},
	/// The slot moved on since `expected` was observed; nothing was written.
	GenerationMismatch {
		/// Generation currently held by the store.
		current: u64,
	},
}
impl CompareAndSwapOutcome {
	/// Generation the store holds after the attempt, whether or not it wrote.
	pub fn generation(self) -> u64 {
		match self {
			Self::Updated { generation } => generation,
			Self::GenerationMismatch { current } => current,
		}
	}
}

/// Point-in-time copy of a [`CredentialStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
	/// Current bearer credential, if any.
	pub credential: Option<Credential>,
	/// Current CSRF token, if any.
	pub csrf: Option<CsrfToken>,
	/// Cookie header value forwarded on every upstream call.
	pub cookies: Option<TokenSecret>,
	/// Incremented on every credential replacement or session reset.
	pub generation: u64,
	/// Incremented on every CSRF token replacement or session reset.
	pub csrf_generation: u64,
}

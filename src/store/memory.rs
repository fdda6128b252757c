//! Thread-safe in-memory [`CredentialStore`] implementation.

// self
use crate::{
	_prelude::*,
	auth::{Credential, CsrfToken, TokenSecret},
	store::{CompareAndSwapOutcome, CredentialStore, SessionSnapshot},
};

/// Process-local store guarded by a single lock so snapshots are never torn.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<SessionSnapshot>>);
impl MemoryStore {
	/// Creates a store seeded with a credential.
	pub fn with_credential(credential: Credential) -> Self {
		let store = Self::default();

		store.replace_credential(credential);

		store
	}
}
impl CredentialStore for MemoryStore {
	fn snapshot(&self) -> SessionSnapshot {
		self.0.read().clone()
	}

	fn replace_credential(&self, credential: Credential) -> u64 {
		let mut guard = self.0.write();

		guard.credential = Some(credential);
		guard.generation += 1;

		guard.generation
	}

	fn replace_csrf(&self, token: CsrfToken) -> u64 {
		let mut guard = self.0.write();

		guard.csrf = Some(token);
		guard.csrf_generation += 1;

		guard.csrf_generation
	}

	fn replace_credential_if(&self, expected: u64, credential: Credential) -> CompareAndSwapOutcome {
		let mut guard = self.0.write();

		if guard.generation != expected {
			return CompareAndSwapOutcome::GenerationMismatch { current: guard.generation };
		}

		guard.credential = Some(credential);
		guard.generation += 1;

		CompareAndSwapOutcome::Updated { generation: guard.generation }
	}

	fn replace_csrf_if(&self, expected: u64, token: CsrfToken) -> CompareAndSwapOutcome {
		let mut guard = self.0.write();

		if guard.csrf_generation != expected {
			return CompareAndSwapOutcome::GenerationMismatch { current: guard.csrf_generation };
		}

		guard.csrf = Some(token);
		guard.csrf_generation += 1;

		CompareAndSwapOutcome::Updated { generation: guard.csrf_generation }
	}

	fn replace_cookies(&self, cookies: Option<TokenSecret>) {
		self.0.write().cookies = cookies;
	}

	fn clear(&self) {
		let mut guard = self.0.write();

		guard.credential = None;
		guard.csrf = None;
		guard.cookies = None;
		guard.generation += 1;
		guard.csrf_generation += 1;
	}
}

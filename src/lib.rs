//! Authenticated GraphQL transport: bearer + CSRF injection, single-flight credential refresh,
//! bounded transient retries, and deterministic routing of unrecoverable failures.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authenticator;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graphql;
pub mod http;
pub mod identity;
pub mod navigator;
pub mod obs;
pub mod retry;
pub mod store;
pub mod transport;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::TransportConfig,
		navigator::{Navigator, RecordingNavigator},
		store::{CredentialStore, MemoryStore},
		transport::ReqwestTransport,
	};

	/// Retry policy with tiny delays so integration tests never sleep for long.
	pub fn fast_retry_policy() -> crate::retry::RetryPolicy {
		crate::retry::RetryPolicy::default()
			.with_initial_delay(Duration::from_millis(5))
			.with_max_delay(Duration::from_millis(20))
			.with_jitter(0.0)
	}

	/// Builds a transport config pointing at a mock server's `/graphql`, `/apollo-csrf` and
	/// `/apollo-refresh` endpoints.
	pub fn test_config(base: &str) -> TransportConfig {
		let base = Url::parse(base).expect("Mock server base URL should parse.");

		TransportConfig::builder()
			.graphql_endpoint(base.join("graphql").expect("GraphQL endpoint should join."))
			.identity_base(&base)
			.expect("Identity endpoints should join.")
			.retry(fast_retry_policy())
			.identity_timeout(Duration::from_secs(2))
			.build()
			.expect("Test transport config should validate.")
	}

	/// Constructs a reqwest-backed [`ReqwestTransport`] with an in-memory store seeded with
	/// `credential`, plus the recording navigator the transport reports redirects to.
	pub fn build_reqwest_test_transport(
		config: TransportConfig,
		credential: &str,
	) -> (ReqwestTransport, Arc<MemoryStore>, Arc<RecordingNavigator>) {
		let store_backend = Arc::new(MemoryStore::default());

		store_backend.replace_credential(crate::auth::Credential::new(credential));

		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let navigator_backend = Arc::new(RecordingNavigator::default());
		let navigator: Arc<dyn Navigator> = navigator_backend.clone();
		let transport =
			ReqwestTransport::new(config, store, navigator).expect("Test transport should build.");

		(transport, store_backend, navigator_backend)
	}
}

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value;
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use ::http as http_types;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};

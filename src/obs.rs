//! Optional observability helpers for pipeline stages.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `graphql_transport.flow` with the `flow`
//!   (stage family) and `stage` (call site) fields, plus events for retries, refresh episodes and
//!   redirects.
//! - Enable `metrics` to increment the `graphql_transport_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Pipeline stage families observed by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// One caller-facing GraphQL operation, including replays and retries.
	Operation,
	/// Credential refresh episode.
	Refresh,
	/// CSRF token fetch.
	Csrf,
	/// Backoff-and-retry of a transient network failure.
	Retry,
	/// Redirect to a dedicated error surface.
	Redirect,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Operation => "operation",
			FlowKind::Refresh => "refresh",
			FlowKind::Csrf => "csrf",
			FlowKind::Retry => "retry",
			FlowKind::Redirect => "redirect",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a stage.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Severity of an event emitted through [`emit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventLevel {
	/// Routine progress.
	Debug,
	/// Notable but expected.
	Info,
	/// Recovered or recoverable failure.
	Warn,
	/// Unrecoverable failure.
	Error,
}

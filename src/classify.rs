//! Failure classification: maps a failed operation onto exactly one recovery action.
//!
//! Classification is pure. Classifiers only read a [`FailureContext`]; acting on the returned
//! [`RecoveryAction`] is the pipeline's job.

// self
use crate::{
	_prelude::*,
	error::FailureKind,
	graphql::{ErrorCode, GraphqlError},
};

/// Hook deciding how the pipeline recovers from a failed operation.
pub trait ErrorClassifier: Send + Sync {
	/// Assigns the failure described by `ctx` to a recovery action.
	fn classify(&self, ctx: &FailureContext) -> RecoveryAction;
}

/// Recovery actions the pipeline knows how to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
	/// Credential invalid or expired; refresh and replay.
	Reauth,
	/// Anti-forgery token rejected; fetch a new one and replay.
	CsrfRepair,
	/// Unrecoverable server fault; redirect to the error page.
	FatalServer,
	/// Transport did not complete; retry with backoff.
	TransientNetwork,
	/// Anything else; surface to the caller as data.
	ApplicationError,
}
impl RecoveryAction {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Reauth => "reauth",
			Self::CsrfRepair => "csrf_repair",
			Self::FatalServer => "fatal_server",
			Self::TransientNetwork => "transient_network",
			Self::ApplicationError => "application_error",
		}
	}

	/// Failure kind reported when this action cannot recover the operation.
	pub const fn failure_kind(self) -> FailureKind {
		match self {
			Self::Reauth => FailureKind::Reauthentication,
			Self::CsrfRepair => FailureKind::CsrfInvalid,
			Self::FatalServer => FailureKind::ServerFault,
			Self::TransientNetwork => FailureKind::NetworkTransient,
			Self::ApplicationError => FailureKind::ApplicationLevel,
		}
	}
}
impl Display for RecoveryAction {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Everything a classifier may look at for one failed attempt.
///
/// Only plain data is kept so classifiers never depend on the HTTP stack.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailureContext {
	/// HTTP status of the GraphQL response, when one arrived.
	pub http_status: Option<u16>,
	/// `extensions.code` of every structured error, in response order.
	pub codes: Vec<ErrorCode>,
	/// Set when the transport itself failed to complete the exchange.
	pub network_error: bool,
}
impl FailureContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Convenience constructor for transport-level failures.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Self::default() }
	}

	/// Adds the HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the codes of the provided structured errors.
	pub fn with_errors(mut self, errors: &[GraphqlError]) -> Self {
		self.codes.extend(errors.iter().map(GraphqlError::code));

		self
	}

	/// Adds a single code.
	pub fn with_code(mut self, code: ErrorCode) -> Self {
		self.codes.push(code);

		self
	}
}

/// Default classifier for the `UNAUTHENTICATED` / `FORBIDDEN` / `INTERNAL_SERVER_ERROR` table.
///
/// Structured codes win over the HTTP status. Among codes the precedence is
/// reauth > CSRF repair > fatal > application, so a session fix gets the first chance to clear
/// downstream errors.
#[derive(Debug, Default)]
pub struct DefaultErrorClassifier;
impl Display for DefaultErrorClassifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-error-classifier")
	}
}
impl ErrorClassifier for DefaultErrorClassifier {
	fn classify(&self, ctx: &FailureContext) -> RecoveryAction {
		if ctx.network_error {
			return RecoveryAction::TransientNetwork;
		}
		if let Some(action) = classify_codes(&ctx.codes) {
			return action;
		}

		classify_status(ctx.http_status)
	}
}

fn classify_codes(codes: &[ErrorCode]) -> Option<RecoveryAction> {
	if codes.is_empty() {
		return None;
	}

	let has = |wanted: ErrorCode| codes.iter().any(|code| *code == wanted);

	if has(ErrorCode::Unauthenticated) {
		Some(RecoveryAction::Reauth)
	} else if has(ErrorCode::Forbidden) {
		Some(RecoveryAction::CsrfRepair)
	} else if has(ErrorCode::InternalServerError) {
		Some(RecoveryAction::FatalServer)
	} else {
		Some(RecoveryAction::ApplicationError)
	}
}

fn classify_status(status: Option<u16>) -> RecoveryAction {
	match status {
		Some(401) => RecoveryAction::Reauth,
		Some(403) => RecoveryAction::CsrfRepair,
		Some(502..=504) => RecoveryAction::TransientNetwork,
		Some(code) if code >= 500 => RecoveryAction::FatalServer,
		_ => RecoveryAction::ApplicationError,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn classify(ctx: FailureContext) -> RecoveryAction {
		DefaultErrorClassifier.classify(&ctx)
	}

	#[test]
	fn single_codes_map_to_their_actions() {
		let cases = [
			("UNAUTHENTICATED", RecoveryAction::Reauth),
			("FORBIDDEN", RecoveryAction::CsrfRepair),
			("INTERNAL_SERVER_ERROR", RecoveryAction::FatalServer),
			("BAD_USER_INPUT", RecoveryAction::ApplicationError),
		];

		for (code, expected) in cases {
			let errors = [GraphqlError::with_code("boom", code)];

			assert_eq!(classify(FailureContext::new().with_errors(&errors)), expected, "{code}");
		}
	}

	#[test]
	fn reauth_wins_over_every_other_code() {
		let errors = [
			GraphqlError::with_code("fatal", "INTERNAL_SERVER_ERROR"),
			GraphqlError::with_code("csrf", "FORBIDDEN"),
			GraphqlError::with_code("session", "UNAUTHENTICATED"),
		];

		assert_eq!(classify(FailureContext::new().with_errors(&errors)), RecoveryAction::Reauth);
		assert_eq!(
			classify(FailureContext::new().with_errors(&errors[..2])),
			RecoveryAction::CsrfRepair
		);
	}

	#[test]
	fn codes_win_over_status() {
		let ctx = FailureContext::new().with_http_status(500).with_code(ErrorCode::Absent);

		assert_eq!(classify(ctx), RecoveryAction::ApplicationError);
	}

	#[test]
	fn status_fallback_without_structured_errors() {
		assert_eq!(classify(FailureContext::new().with_http_status(401)), RecoveryAction::Reauth);
		assert_eq!(classify(FailureContext::new().with_http_status(403)), RecoveryAction::CsrfRepair);
		assert_eq!(
			classify(FailureContext::new().with_http_status(503)),
			RecoveryAction::TransientNetwork
		);
		assert_eq!(classify(FailureContext::new().with_http_status(500)), RecoveryAction::FatalServer);
		assert_eq!(
			classify(FailureContext::new().with_http_status(404)),
			RecoveryAction::ApplicationError
		);
	}

	#[test]
	fn network_failures_are_transient() {
		assert_eq!(classify(FailureContext::network_failure()), RecoveryAction::TransientNetwork);
		assert_eq!(RecoveryAction::TransientNetwork.failure_kind(), FailureKind::NetworkTransient);
	}
}

// self
use crate::{
	_prelude::*,
	obs::{EventLevel, FlowKind},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// A span builder used by pipeline stages.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("graphql_transport.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a single event tagged with the flow kind. Secrets must never be passed as `detail`.
pub fn emit(level: EventLevel, kind: FlowKind, message: &str, detail: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		let flow = kind.as_str();

		match level {
			EventLevel::Debug => tracing::debug!(flow, detail = %detail, "{message}"),
			EventLevel::Info => tracing::info!(flow, detail = %detail, "{message}"),
			EventLevel::Warn => tracing::warn!(flow, detail = %detail, "{message}"),
			EventLevel::Error => tracing::error!(flow, detail = %detail, "{message}"),
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (level, kind, message, detail);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn emit_accepts_every_level() {
		for level in [EventLevel::Debug, EventLevel::Info, EventLevel::Warn, EventLevel::Error] {
			emit(level, FlowKind::Retry, "smoke", &"detail");
		}
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FlowSpan::new(FlowKind::Operation, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}

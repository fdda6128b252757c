//! GraphQL-over-HTTP wire types.

// self
use crate::{_prelude::*, error::ProtocolError, http::Endpoint};

/// Outbound GraphQL payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
	/// Query or mutation document.
	pub query: String,
	/// Operation to run when the document holds several.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub operation_name: Option<String>,
	/// Variables object; omitted from the payload when null.
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub variables: Value,
}
impl GraphqlRequest {
	/// Creates a request for the provided document.
	pub fn new(query: impl Into<String>) -> Self {
		Self { query: query.into(), operation_name: None, variables: Value::Null }
	}

	/// Sets the operation name.
	pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
		self.operation_name = Some(name.into());

		self
	}

	/// Sets the variables object.
	pub fn with_variables(mut self, variables: Value) -> Self {
		self.variables = variables;

		self
	}

	/// Label used in spans and log lines.
	pub fn label(&self) -> &str {
		self.operation_name.as_deref().unwrap_or("anonymous")
	}
}

/// Decoded GraphQL response envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
	/// Result data; may be partial when `errors` is non-empty.
	#[serde(default)]
	pub data: Option<Value>,
	/// Structured errors.
	#[serde(default)]
	pub errors: Vec<GraphqlError>,
}
impl GraphqlResponse {
	/// Parses a response body, reporting the JSON path of any mismatch.
	pub fn from_slice(body: &[u8], status: Option<u16>) -> Result<Self, ProtocolError> {
		let deserializer = &mut serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(deserializer).map_err(|source| {
			ProtocolError::ResponseParse { endpoint: Endpoint::Graphql, source, status }
		})
	}

	/// Returns true when the server reported no structured errors.
	pub fn is_clean(&self) -> bool {
		self.errors.is_empty()
	}
}

/// One entry of a response's `errors[]` array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
	/// Human-readable message.
	pub message: String,
	/// Response path the error applies to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<Vec<Value>>,
	/// Vendor extensions carrying the `code` discriminator.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extensions: Option<ErrorExtensions>,
}
impl GraphqlError {
	/// Creates an error with a message and an `extensions.code`.
	pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			path: None,
			extensions: Some(ErrorExtensions { code: Some(code.into()), extra: Default::default() }),
		}
	}

	/// Discriminator read from `extensions.code`.
	pub fn code(&self) -> ErrorCode {
		ErrorCode::parse(self.extensions.as_ref().and_then(|ext| ext.code.as_deref()))
	}
}

/// `extensions` object of a [`GraphqlError`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorExtensions {
	/// Error code discriminator.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	/// Remaining extension fields, preserved verbatim.
	#[serde(flatten)]
	pub extra: serde_json::Map<String, Value>,
}

/// Error codes the classifier understands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	/// Credential missing, invalid or expired.
	Unauthenticated,
	/// Anti-forgery token missing or invalid.
	Forbidden,
	/// Unrecoverable server fault.
	InternalServerError,
	/// Any other code.
	Other(String),
	/// No `extensions.code` present.
	Absent,
}
impl ErrorCode {
	/// Parses an `extensions.code` value.
	pub fn parse(code: Option<&str>) -> Self {
		let Some(code) = code else {
			return Self::Absent;
		};

		if code.eq_ignore_ascii_case("UNAUTHENTICATED") {
			Self::Unauthenticated
		} else if code.eq_ignore_ascii_case("FORBIDDEN") {
			Self::Forbidden
		} else if code.eq_ignore_ascii_case("INTERNAL_SERVER_ERROR") {
			Self::InternalServerError
		} else {
			Self::Other(code.to_owned())
		}
	}
}

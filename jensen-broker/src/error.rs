use thiserror::Error;

use crate::cause::CauseSerializer;
use crate::codec::CodecError;
use crate::failure::{DescribableFailure, OperationFailure, Properties};
use crate::locator::LocatorError;
use crate::registry::IncompatibilityReport;
use crate::types::{ErrorCode, ErrorDetails, Request, SERVER_ERROR_CODE};

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Everything that can go wrong between receiving a request and writing its response.
///
/// Every variant maps to exactly one JSON-RPC error code via [`BrokerError::error_code`], and is
/// turned into the error object of a response with [`BrokerError::to_error_details`].  The variant
/// name doubles as the `type` of the serialized cause.
#[derive(Debug, Error, strum::IntoStaticStr)]
pub enum BrokerError {
    #[error("Parse error")]
    Parse { source: CodecError },

    #[error("Request is missing")]
    MissingRequest,

    #[error("Invalid request")]
    InvalidEnvelope { source: serde_json::Error },

    #[error("JSON-RPC {version} is unsupported. Use 2.0 instead")]
    UnsupportedVersion { version: String },

    #[error("Invocation of {method} not allowed")]
    NotAllowed { method: String },

    #[error("Security filter failed on {method}: {failure}")]
    SecurityFilter { method: String, failure: anyhow::Error },

    #[error("Method {method} is not of the form Target.member")]
    MalformedMethod { method: String },

    #[error("Target {target} not found")]
    UnknownTarget { target: String },

    #[error("Method {member} in target {target} not found")]
    MemberNotFound { target: String, member: String },

    #[error("No method {member} in target {target} can take the given parameters")]
    IncompatibleMember {
        target: String,
        member: String,
        incompatible: IncompatibilityReport,
    },

    #[error("Target {target} cannot be instantiated")]
    NotInstantiable { target: String, source: LocatorError },

    #[error("Method call {signature} cannot accept the parameters given ({received} != {expected})")]
    ArgumentMismatch {
        signature: String,
        received: usize,
        expected: usize,
    },

    #[error("Method call {signature} cannot be accessed")]
    Inaccessible { signature: String },

    #[error("Method call {signature} failed: {failure}")]
    Operation {
        signature: String,
        failure: OperationFailure,
    },

    #[error("Invocation of {signature} was refused: {failure}")]
    Interceptor { signature: String, failure: anyhow::Error },

    #[error("Return value handler failed: {failure}")]
    ReturnValue { failure: anyhow::Error },

    #[error("Response handler failed: {failure}")]
    ResponseHandler { failure: anyhow::Error },

    #[error("Result of {signature} could not be serialized")]
    ResultEncoding {
        signature: String,
        source: serde_json::Error,
    },

    #[error("Response could not be encoded")]
    Encode { source: CodecError },

    #[error("Request could not be read")]
    Read { source: std::io::Error },

    #[error("Request processing did not complete: {message}")]
    Worker { message: String },
}

impl BrokerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BrokerError::Parse { .. } => ErrorCode::ParseError,

            BrokerError::MissingRequest
            | BrokerError::InvalidEnvelope { .. }
            | BrokerError::UnsupportedVersion { .. }
            | BrokerError::NotAllowed { .. } => ErrorCode::InvalidRequest,

            BrokerError::MalformedMethod { .. }
            | BrokerError::UnknownTarget { .. }
            | BrokerError::MemberNotFound { .. }
            | BrokerError::IncompatibleMember { .. }
            | BrokerError::NotInstantiable { .. } => ErrorCode::MethodNotFound,

            BrokerError::ArgumentMismatch { .. } | BrokerError::Inaccessible { .. } => ErrorCode::InvalidParams,

            BrokerError::Operation { .. } | BrokerError::Interceptor { .. } | BrokerError::ResponseHandler { .. } => {
                ErrorCode::ServerError(SERVER_ERROR_CODE)
            }

            BrokerError::SecurityFilter { .. }
            | BrokerError::ReturnValue { .. }
            | BrokerError::ResultEncoding { .. }
            | BrokerError::Encode { .. }
            | BrokerError::Read { .. }
            | BrokerError::Worker { .. } => ErrorCode::InternalError,
        }
    }

    /// Build the error object of a JSON-RPC response for this failure.
    ///
    /// Failures raised by user code (the operation itself, or one of the host's hooks) are
    /// reported with that failure as the cause, so the caller sees the original type and message
    /// rather than the broker's wrapper.  Everything else describes itself.
    pub fn to_error_details(&self, serializer: &CauseSerializer, request: Option<&Request>) -> ErrorDetails {
        let (message, cause) = match self {
            BrokerError::Operation { failure, .. } => {
                (failure.to_string(), serializer.serialize_operation_failure(failure, None))
            }
            BrokerError::SecurityFilter { failure, .. }
            | BrokerError::Interceptor { failure, .. }
            | BrokerError::ReturnValue { failure }
            | BrokerError::ResponseHandler { failure } => {
                (self.to_string(), serializer.serialize_anyhow(failure, None))
            }
            _ => (self.to_string(), serializer.serialize(self, None)),
        };
        let cause = cause.with_request(request);

        let data = match serde_json::to_value(&cause) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize error cause; responding without data");
                None
            }
        };

        ErrorDetails::new(self.error_code(), message, data)
    }
}

impl DescribableFailure for BrokerError {
    fn type_name(&self) -> &'static str {
        self.into()
    }

    fn describe(&self, properties: &mut Properties) {
        match self {
            BrokerError::UnsupportedVersion { version } => {
                properties.insert("version", version);
            }
            BrokerError::NotAllowed { method }
            | BrokerError::SecurityFilter { method, .. }
            | BrokerError::MalformedMethod { method } => {
                properties.insert("method", method);
            }
            BrokerError::UnknownTarget { target } | BrokerError::NotInstantiable { target, .. } => {
                properties.insert("target", target);
            }
            BrokerError::MemberNotFound { target, member } => {
                properties.insert("target", target).insert("member", member);
            }
            BrokerError::IncompatibleMember {
                target,
                member,
                incompatible,
            } => {
                properties
                    .insert("target", target)
                    .insert("member", member)
                    .insert("incompatible", incompatible);
            }
            BrokerError::ArgumentMismatch {
                signature,
                received,
                expected,
            } => {
                properties
                    .insert("signature", signature)
                    .insert("received", received)
                    .insert("expected", expected);
            }
            BrokerError::Inaccessible { signature }
            | BrokerError::Operation { signature, .. }
            | BrokerError::Interceptor { signature, .. }
            | BrokerError::ResultEncoding { signature, .. } => {
                properties.insert("signature", signature);
            }
            BrokerError::Parse { .. }
            | BrokerError::MissingRequest
            | BrokerError::InvalidEnvelope { .. }
            | BrokerError::ReturnValue { .. }
            | BrokerError::ResponseHandler { .. }
            | BrokerError::Encode { .. }
            | BrokerError::Read { .. }
            | BrokerError::Worker { .. } => {}
        }
    }
}

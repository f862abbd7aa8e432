//! Maps AWS SDK failures onto the remote error kinds the reconciler acts on.

use std::error::Error as StdError;
use std::fmt::Debug;

use aws_sdk_apigateway::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use route_sync_core::remote::{RemoteError, RemoteErrorKind};

/// Kind for a service error code as returned by API Gateway or Lambda.
pub fn kind_for_code(code: &str) -> RemoteErrorKind {
    match code {
        "ConflictException" | "ResourceConflictException" => RemoteErrorKind::Conflict,
        "NotFoundException" | "ResourceNotFoundException" => RemoteErrorKind::NotFound,
        "TooManyRequestsException" | "ThrottlingException" | "Throttling"
        | "LimitExceededException" => RemoteErrorKind::Throttled,
        "ServiceUnavailableException" | "ServiceException" | "InternalFailure"
        | "InternalServerError" | "RequestTimeout" | "RequestTimeoutException" => {
            RemoteErrorKind::Transient
        }
        "AccessDeniedException" | "AccessDenied" | "UnauthorizedException"
        | "UnrecognizedClientException" | "ExpiredTokenException"
        | "InvalidSignatureException" => RemoteErrorKind::AccessDenied,
        "BadRequestException" | "InvalidParameterValueException" | "ValidationException"
        | "PolicyLengthExceededException" => RemoteErrorKind::Validation,
        _ => RemoteErrorKind::Other,
    }
}

/// Classifies an SDK failure. Transport failures and timeouts never reached
/// the service, so they are retryable.
pub fn classify<E, R>(operation: &str, error: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let kind = match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            RemoteErrorKind::Transient
        }
        SdkError::ServiceError(context) => context
            .err()
            .code()
            .map(kind_for_code)
            .unwrap_or(RemoteErrorKind::Other),
        _ => RemoteErrorKind::Other,
    };
    let message = match &error {
        SdkError::ServiceError(context) => context
            .err()
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| DisplayErrorContext(&error).to_string()),
        _ => DisplayErrorContext(&error).to_string(),
    };
    RemoteError::new(kind, operation, message)
}

/// Keeps a conflict only when its message says the target already exists.
/// Any other conflict reports a concurrent modification that was not
/// applied, so it becomes retryable.
pub fn refine_conflict(mut error: RemoteError, exists_markers: &[&str]) -> RemoteError {
    if error.kind == RemoteErrorKind::Conflict
        && !exists_markers
            .iter()
            .any(|marker| error.message.contains(marker))
    {
        error.kind = RemoteErrorKind::Transient;
    }
    error
}

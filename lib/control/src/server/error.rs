use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use cluster_client::entities::ErrorResponse;

/// Every failure the join endpoint reports.
/// The message is what the client receives, details stay in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
  #[error("An API version was not specified in the request.")]
  ApiVersionMissing,
  #[error("Invalid API version was specified in the request.")]
  ApiVersionInvalid,
  #[error("The requested join API version is no longer supported.")]
  ApiVersionDropped,
  #[error("The requested join API version is not yet implemented.")]
  ApiVersionNotImplemented,
  #[error(
    "The request does not have a Content-Type header set to application/json."
  )]
  IncorrectContentType,
  #[error("The request includes invalid JSON.")]
  InvalidJsonInRequest,
  #[error("The request does not have the required authentication data.")]
  MissingAuthDataInRequest,
  #[error("The authentication data in the request has invalid format.")]
  InvalidAuthDataFormatInRequest,
  #[error(
    "Failed to pass authorization using the data provided in the request"
  )]
  AuthorizationFailed,
  #[error(
    "The clustering server has encountered an unexpected error while handling the request."
  )]
  UnexpectedError,
}

impl ApiError {
  pub fn status_code(self) -> StatusCode {
    use ApiError::*;
    match self {
      ApiVersionMissing
      | ApiVersionInvalid
      | IncorrectContentType
      | InvalidJsonInRequest
      | MissingAuthDataInRequest
      | InvalidAuthDataFormatInRequest => StatusCode::BAD_REQUEST,
      ApiVersionDropped => StatusCode::GONE,
      ApiVersionNotImplemented => StatusCode::NOT_IMPLEMENTED,
      AuthorizationFailed => StatusCode::UNAUTHORIZED,
      UnexpectedError => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// Logs the full chain, the client only gets the generic message.
  pub fn unexpected(context: &str, e: impl Into<anyhow::Error>) -> ApiError {
    let e = e.into();
    tracing::error!("{context} | {e:#}");
    ApiError::UnexpectedError
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (
      self.status_code(),
      Json(ErrorResponse {
        message: self.to_string(),
      }),
    )
      .into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_table() {
    use ApiError::*;
    for (error, status) in [
      (ApiVersionMissing, 400),
      (ApiVersionInvalid, 400),
      (ApiVersionDropped, 410),
      (ApiVersionNotImplemented, 501),
      (IncorrectContentType, 400),
      (InvalidJsonInRequest, 400),
      (MissingAuthDataInRequest, 400),
      (InvalidAuthDataFormatInRequest, 400),
      (AuthorizationFailed, 401),
      (UnexpectedError, 500),
    ] {
      assert_eq!(error.status_code().as_u16(), status, "{error:?}");
    }
  }
}

use reqwest::{RequestBuilder, Response, StatusCode, header};

use crate::auth::Credentials;
use crate::error::ApiError;

/// Attach the Authorization header to an outgoing request.
pub fn authorize(req: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    req.header(header::AUTHORIZATION, credentials.bearer())
}

/// Turn non-success responses into typed errors.
pub async fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(error_for_status(status, body))
}

pub fn error_for_status(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        other => ApiError::Status {
            status: other.as_u16(),
            // Keep error messages short; bodies can be whole HTML pages.
            body: body.chars().take(200).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_typed() {
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, String::new()),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, String::new()),
            ApiError::Forbidden
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = error_for_status(StatusCode::BAD_GATEWAY, "x".repeat(500));
        assert!(err.is_transient());
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), 200);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!error_for_status(StatusCode::BAD_REQUEST, String::new()).is_transient());
    }
}

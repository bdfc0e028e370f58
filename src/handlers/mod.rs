//! # HTTP Request Handlers
//!
//! Thin layer between the routed request and the domain services. The
//! caller's identity arrives in the `X-User-Id` header, already
//! authenticated upstream; token issuance is outside this service.

pub mod config;
pub mod models;
pub mod predictions;
pub mod users;

pub use config::*;
pub use models::*;
pub use predictions::*;
pub use users::*;

use crate::error::AppError;
use actix_web::HttpRequest;
use uuid::Uuid;

/// Extract the authenticated caller from the `X-User-Id` header.
pub(crate) fn caller_id(req: &HttpRequest) -> Result<Uuid, AppError> {
    let raw = req
        .headers()
        .get("X-User-Id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("X-User-Id header is required".to_string()))?;

    Uuid::parse_str(raw)
        .map_err(|_| AppError::Unauthorized(format!("invalid user id '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_caller_id_parses_header() {
        let user = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header(("X-User-Id", user.to_string()))
            .to_http_request();
        assert_eq!(caller_id(&req).unwrap(), user);
    }

    #[test]
    fn test_caller_id_rejects_missing_or_garbled_header() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(caller_id(&req), Err(AppError::Unauthorized(_))));

        let req = TestRequest::default()
            .insert_header(("X-User-Id", "not-a-uuid"))
            .to_http_request();
        assert!(matches!(caller_id(&req), Err(AppError::Unauthorized(_))));
    }
}

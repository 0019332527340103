//! Request extractors shared by the handlers.

use crate::errors::AppError;
use axum::{
    Form, Json,
    body::Bytes,
    extract::{FromRequest, Request},
    http::header,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Body that may arrive as JSON, as an urlencoded form, or empty.
///
/// An empty body is read as `{}`, so it only succeeds for types whose fields
/// are all optional.
#[derive(Debug)]
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
            return Ok(Self(value));
        }

        if content_type.starts_with("application/json") {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
            return Ok(Self(value));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        let parsed = if body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_str::<T>("{}")
        } else {
            serde_json::from_slice::<T>(&body)
        };
        parsed
            .map(Self)
            .map_err(|err| AppError::bad_request(format!("invalid request body: {}", err)))
    }
}

/// Parse a path id; anything that is not a UUID cannot name a resource.
pub fn parse_id(raw: &str, kind: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found(format!("{} `{}` not found", kind, raw)))
}

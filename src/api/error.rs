use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::MarketError;

/// Error rendered as `{ "error": <message> }` with the mapped status
#[derive(Debug)]
pub struct ApiError(pub MarketError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl<E> From<E> for ApiError
where
    E: Into<MarketError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match err.status_code() {
            401 => warn!(error = %err, "Authentication rejected"),
            code if code >= 500 => error!(error = %err, "Request failed"),
            _ => debug!(error = %err, "Request rejected"),
        }

        (status, Json(json!({ "error": err.public_message() }))).into_response()
    }
}

/// `Json` extractor whose rejections use the `{ "error": ... }` shape
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError(MarketError::Validation(rejection_text(rejection)))),
        }
    }
}

fn rejection_text(rejection: JsonRejection) -> String {
    rejection.body_text()
}

use axum::{http::{HeaderValue, StatusCode}, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use crate::domain::aggregates::Shortfall;
use crate::EcommerceError;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")] pub shortfalls: Vec<Shortfall>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, message: Option<String> },
    Unauthorized { code: &'static str },
    NotFound { code: &'static str, message: Option<String> },
    Conflict { code: &'static str, message: Option<String>, shortfalls: Vec<Shortfall> },
    Unprocessable { code: &'static str, message: Option<String> },
    Internal { message: Option<String> },
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self { Self::BadRequest { code, message: Some(message.into()) } }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } | Self::Unauthorized { code } | Self::NotFound { code, .. }
            | Self::Conflict { code, .. } | Self::Unprocessable { code, .. } => *code,
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<EcommerceError> for ApiError {
    fn from(e: EcommerceError) -> Self {
        let message = Some(e.to_string());
        match e {
            EcommerceError::ProductNotFound(_) => Self::NotFound { code: "product_not_found", message },
            EcommerceError::OrderNotFound(_) => Self::NotFound { code: "order_not_found", message },
            EcommerceError::CartItemNotFound => Self::NotFound { code: "cart_item_not_found", message },
            EcommerceError::EmptyCart => Self::BadRequest { code: "empty_cart", message },
            EcommerceError::InvalidQuantity => Self::BadRequest { code: "invalid_quantity", message },
            EcommerceError::CapacityExceeded { key, requested, available } => Self::Conflict {
                code: "capacity_exceeded", message, shortfalls: vec![Shortfall::new(key, requested, available)],
            },
            EcommerceError::OutOfStock { shortfalls } => Self::Conflict { code: "out_of_stock", message, shortfalls },
            EcommerceError::InvalidTransition(_) => Self::Conflict { code: "invalid_transition", message, shortfalls: vec![] },
            EcommerceError::CurrencyMismatch => Self::Unprocessable { code: "currency_mismatch", message },
            EcommerceError::UnsupportedPaymentMethod(_) => Self::Unprocessable { code: "unsupported_payment_method", message },
            EcommerceError::InvalidOrder(_) => Self::Unprocessable { code: "invalid_order", message },
            EcommerceError::AmountMismatch { .. } => Self::Unprocessable { code: "amount_mismatch", message },
            EcommerceError::UnchargeableAmount { .. } => Self::Unprocessable { code: "unchargeable_amount", message },
            EcommerceError::SignatureInvalid { .. } => Self::BadRequest { code: "signature_invalid", message },
            EcommerceError::MalformedCallback { .. } => Self::BadRequest { code: "malformed_callback", message },
            EcommerceError::PaymentConfig(_) | EcommerceError::StorageError(_) => {
                tracing::error!(error = message.as_deref().unwrap_or_default(), "request failed");
                Self::Internal { message: None }
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Unprocessable { code: "validation_failed", message: Some(e.to_string()) } }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_code = self.code();
        let (status, body) = match self {
            ApiError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, ErrorBody { code: code.into(), message, shortfalls: vec![] }),
            ApiError::Unauthorized { code } => (StatusCode::UNAUTHORIZED, ErrorBody { code: code.into(), message: None, shortfalls: vec![] }),
            ApiError::NotFound { code, message } => (StatusCode::NOT_FOUND, ErrorBody { code: code.into(), message, shortfalls: vec![] }),
            ApiError::Conflict { code, message, shortfalls } => (StatusCode::CONFLICT, ErrorBody { code: code.into(), message, shortfalls }),
            ApiError::Unprocessable { code, message } => (StatusCode::UNPROCESSABLE_ENTITY, ErrorBody { code: code.into(), message, shortfalls: vec![] }),
            ApiError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, ErrorBody { code: "internal_error".into(), message, shortfalls: vec![] }),
        };
        let mut resp = (status, Json(body)).into_response();
        resp.headers_mut().insert("X-Error-Code", HeaderValue::from_static(error_code));
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::domain::value_objects::StockKey;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 8).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_capacity_error_shape() {
        let key = StockKey::product(Uuid::new_v4());
        let resp = ApiError::from(EcommerceError::CapacityExceeded { key, requested: 2, available: 1 }).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "capacity_exceeded");
        let body = body_json(resp).await;
        assert_eq!(body["code"], "capacity_exceeded");
        assert_eq!(body["shortfalls"][0]["requested"], 2);
        assert_eq!(body["shortfalls"][0]["available"], 1);
    }

    #[tokio::test]
    async fn test_storage_details_stay_internal() {
        let resp = ApiError::from(EcommerceError::StorageError("connection refused to 10.0.0.5".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "internal_error");
        assert!(body.get("message").is_none());
    }

    #[test]
    fn test_status_per_code() {
        let status = |e: EcommerceError| ApiError::from(e).into_response().status();
        assert_eq!(status(EcommerceError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(status(EcommerceError::OrderNotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status(EcommerceError::UnsupportedPaymentMethod("bank".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(EcommerceError::OutOfStock { shortfalls: vec![] }), StatusCode::CONFLICT);
    }
}

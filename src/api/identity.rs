use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;
use crate::api::error::ApiError;

pub const SHOPPER_HEADER: &str = "X-Shopper-Id";

/// The shopper a request acts for, taken from `X-Shopper-Id`.
///
/// Session handling lives in the storefront gateway; by the time a request gets
/// here the header carries the authenticated shopper or guest session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopperId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ShopperId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(SHOPPER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Self)
            .ok_or(ApiError::Unauthorized { code: "missing_shopper" })
    }
}

//! Gateway notification endpoints.
//!
//! Each provider expects its own acknowledgement shape. Whatever the shape, a
//! callback whose signature did not verify never gets a success answer, and
//! anything that was processed (duplicates included) does, so the provider
//! stops retrying.

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use crate::api::{error::ApiError, AppState};
use crate::domain::value_objects::PaymentProvider;
use crate::payments::CallbackPayload;
use crate::services::CallbackResolution;
use crate::{EcommerceError, Result};

/// Provider-neutral verdict on one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Applied,
    Duplicate,
    /// Verified, but the order had already moved past the event.
    Conflict,
    UnknownOrder,
    AmountMismatch,
    BadSignature,
    Malformed,
    /// Our side failed; the provider should retry.
    Retry,
}

impl Ack {
    fn of(result: &Result<CallbackResolution>) -> Self {
        match result {
            Ok(CallbackResolution::Applied { .. }) => Self::Applied,
            Ok(CallbackResolution::Duplicate { .. }) => Self::Duplicate,
            Ok(CallbackResolution::Conflict { .. }) => Self::Conflict,
            Err(EcommerceError::OrderNotFound(_)) => Self::UnknownOrder,
            Err(EcommerceError::AmountMismatch { .. } | EcommerceError::UnchargeableAmount { .. }) => Self::AmountMismatch,
            Err(EcommerceError::SignatureInvalid { .. }) => Self::BadSignature,
            // A disabled provider cannot be verified either.
            Err(EcommerceError::MalformedCallback { .. } | EcommerceError::UnsupportedPaymentMethod(_)) => Self::Malformed,
            Err(e) => {
                tracing::error!(error = %e, "callback processing failed");
                Self::Retry
            }
        }
    }
}

async fn reconcile(state: &AppState, provider: PaymentProvider, payload: Option<CallbackPayload>) -> Ack {
    match payload {
        Some(payload) => Ack::of(&state.reconciler.apply_callback(provider, &payload).await),
        None => {
            tracing::warn!(%provider, "callback body is not a flat object");
            Ack::Malformed
        }
    }
}

pub async fn wallet_callback(State(s): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    match reconcile(&s, PaymentProvider::Wallet, CallbackPayload::from_json(&body)).await {
        Ack::Applied | Ack::Duplicate | Ack::Conflict | Ack::UnknownOrder | Ack::AmountMismatch => StatusCode::NO_CONTENT.into_response(),
        Ack::BadSignature => ApiError::bad_request("signature_invalid", "invalid signature").into_response(),
        Ack::Malformed => ApiError::bad_request("malformed_callback", "malformed callback").into_response(),
        Ack::Retry => ApiError::Internal { message: None }.into_response(),
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct BankAck {
    #[serde(rename = "RspCode")] pub rsp_code: &'static str,
    #[serde(rename = "Message")] pub message: &'static str,
}

impl From<Ack> for BankAck {
    fn from(ack: Ack) -> Self {
        let (rsp_code, message) = match ack {
            Ack::Applied | Ack::Duplicate => ("00", "Confirm Success"),
            Ack::Conflict => ("02", "Order already confirmed"),
            Ack::UnknownOrder => ("01", "Order not found"),
            Ack::AmountMismatch => ("04", "Invalid amount"),
            Ack::BadSignature => ("97", "Invalid signature"),
            Ack::Malformed | Ack::Retry => ("99", "Unknown error"),
        };
        Self { rsp_code, message }
    }
}

/// The bank always gets HTTP 200; the verdict is in `RspCode`.
pub async fn bank_ipn(State(s): State<AppState>, Query(fields): Query<HashMap<String, String>>) -> Json<BankAck> {
    Json(reconcile(&s, PaymentProvider::Bank, Some(CallbackPayload::from_fields(fields))).await.into())
}

pub async fn bank_callback(State(s): State<AppState>, Form(fields): Form<HashMap<String, String>>) -> Json<BankAck> {
    Json(reconcile(&s, PaymentProvider::Bank, Some(CallbackPayload::from_fields(fields))).await.into())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EwalletAck {
    pub return_code: i32,
    pub return_message: &'static str,
}

impl From<Ack> for EwalletAck {
    fn from(ack: Ack) -> Self {
        let (return_code, return_message) = match ack {
            Ack::Applied => (1, "success"),
            Ack::Duplicate | Ack::Conflict => (2, "duplicate"),
            Ack::UnknownOrder => (1, "order not found"),
            Ack::AmountMismatch => (1, "amount mismatch"),
            Ack::BadSignature => (-1, "mac not equal"),
            Ack::Malformed => (-1, "invalid callback"),
            Ack::Retry => (0, "retry"),
        };
        Self { return_code, return_message }
    }
}

pub async fn ewallet_callback(State(s): State<AppState>, Json(body): Json<serde_json::Value>) -> Json<EwalletAck> {
    Json(reconcile(&s, PaymentProvider::Ewallet, CallbackPayload::from_json(&body)).await.into())
}

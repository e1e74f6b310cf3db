//! Provider A: wallet-style gateway with JSON callbacks.
//!
//! Amounts are whole currency units. The access key never travels in the
//! callback body but is part of the callback canonical string.

use uuid::Uuid;
use crate::domain::value_objects::PaymentProvider;
use crate::payments::signature;
use crate::payments::{
    parse_amount, parse_order_id, pay_url, txn_id, CallbackPayload, GatewayAdapter, PaymentRequest, SignedRequest,
    VerifiedCallback,
};
use crate::{EcommerceError, Result};

pub const SIGNATURE_FIELD: &str = "signature";
pub const SUCCESS_CODE: &str = "0";
const REQUEST_TYPE: &str = "captureWallet";

const REQUEST_FIELDS: [&str; 10] = [
    "partnerCode", "accessKey", "requestId", "amount", "orderId",
    "orderInfo", "redirectUrl", "ipnUrl", "extraData", "requestType",
];

const CALLBACK_FIELDS: [&str; 13] = [
    "accessKey", "partnerCode", "orderId", "requestId", "amount", "orderInfo", "orderType",
    "transId", "resultCode", "message", "payType", "responseTime", "extraData",
];

#[derive(Clone, Debug)]
pub struct WalletConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
}

pub struct WalletGateway { config: WalletConfig }

impl WalletGateway {
    pub fn new(config: WalletConfig) -> Self { Self { config } }

    fn callback_value<'a>(&'a self, payload: &'a CallbackPayload, field: &str) -> &'a str {
        match field {
            "accessKey" => &self.config.access_key,
            other => payload.value(other),
        }
    }
}

impl GatewayAdapter for WalletGateway {
    fn provider(&self) -> PaymentProvider { PaymentProvider::Wallet }

    fn build_request(&self, request: &PaymentRequest) -> Result<SignedRequest> {
        let amount = self.charge_amount(&request.amount)?.to_string();
        let order_id = request.order_id.to_string();
        let request_id = Uuid::new_v4().to_string();
        let values = [
            self.config.partner_code.as_str(), self.config.access_key.as_str(), request_id.as_str(), amount.as_str(),
            order_id.as_str(), request.description.as_str(), request.return_url.as_str(),
            request.callback_url.as_str(), "", REQUEST_TYPE,
        ];
        let canonical = signature::canonical_string(REQUEST_FIELDS.into_iter().zip(values));
        let sig = signature::sign(&self.config.secret_key, &canonical)?;

        // accessKey is only a signing input.
        let fields: Vec<(String, String)> = REQUEST_FIELDS.into_iter().zip(values)
            .filter(|(k, _)| *k != "accessKey")
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let pay_url = pay_url(&self.config.endpoint, &fields, SIGNATURE_FIELD, &sig)?;
        Ok(SignedRequest { provider: self.provider(), fields, signature: sig, pay_url })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<VerifiedCallback> {
        let provider = self.provider();
        let supplied = payload.require(provider, SIGNATURE_FIELD)?;
        let canonical = signature::canonical_string(CALLBACK_FIELDS.into_iter().map(|f| (f, self.callback_value(payload, f))));
        if !signature::verify(&self.config.secret_key, &canonical, supplied)? {
            return Err(EcommerceError::SignatureInvalid { provider });
        }
        if payload.value("partnerCode") != self.config.partner_code {
            return Err(EcommerceError::MalformedCallback { provider, reason: "partner code mismatch".into() });
        }
        let result_code = payload.require(provider, "resultCode")?.to_string();
        Ok(VerifiedCallback {
            provider,
            order_id: parse_order_id(provider, payload.require(provider, "orderId")?)?,
            success: self.is_success(&result_code),
            result_code,
            provider_txn_id: txn_id(payload.get("transId")),
            amount_minor: parse_amount(provider, payload.require(provider, "amount")?)?,
            raw: payload.clone(),
        })
    }

    fn is_success(&self, code: &str) -> bool { code.trim() == SUCCESS_CODE }
}

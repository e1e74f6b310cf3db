//! Provider B: bank card gateway.
//!
//! Requests are a signed redirect; callbacks arrive form-encoded. Amounts are
//! sent multiplied by 100 and every field carries a `bk_` prefix.

use crate::domain::value_objects::PaymentProvider;
use crate::payments::signature;
use crate::payments::{
    parse_amount, parse_order_id, pay_url, txn_id, CallbackPayload, GatewayAdapter, PaymentRequest, SignedRequest,
    VerifiedCallback,
};
use crate::{EcommerceError, Result};

pub const SIGNATURE_FIELD: &str = "bk_SecureHash";
pub const SUCCESS_CODE: &str = "00";
const VERSION: &str = "2.1.0";
const DATE_FORMAT: &str = "%Y%m%d%H%M%S";

const REQUEST_FIELDS: [&str; 12] = [
    "bk_Version", "bk_Command", "bk_MerchantId", "bk_Amount", "bk_CurrCode", "bk_TxnRef",
    "bk_OrderInfo", "bk_Locale", "bk_ReturnUrl", "bk_IpnUrl", "bk_CreateDate", "bk_ExpireDate",
];

const CALLBACK_FIELDS: [&str; 9] = [
    "bk_MerchantId", "bk_TxnRef", "bk_Amount", "bk_OrderInfo", "bk_BankCode",
    "bk_TransactionNo", "bk_ResponseCode", "bk_TransactionStatus", "bk_PayDate",
];

#[derive(Clone, Debug)]
pub struct BankConfig {
    pub merchant_id: String,
    pub hash_secret: String,
    pub endpoint: String,
    pub locale: String,
}

pub struct BankGateway { config: BankConfig }

impl BankGateway {
    pub fn new(config: BankConfig) -> Self { Self { config } }
}

impl GatewayAdapter for BankGateway {
    fn provider(&self) -> PaymentProvider { PaymentProvider::Bank }

    fn amount_scale(&self) -> u32 { 2 }

    fn build_request(&self, request: &PaymentRequest) -> Result<SignedRequest> {
        let amount = self.charge_amount(&request.amount)?.to_string();
        let txn_ref = request.order_id.simple().to_string();
        let created = request.created_at.format(DATE_FORMAT).to_string();
        let expires = request.expires_at.format(DATE_FORMAT).to_string();
        let values = [
            VERSION, "pay", self.config.merchant_id.as_str(), amount.as_str(), request.amount.currency(),
            txn_ref.as_str(), request.description.as_str(), self.config.locale.as_str(),
            request.return_url.as_str(), request.callback_url.as_str(), created.as_str(), expires.as_str(),
        ];
        let canonical = signature::canonical_string(REQUEST_FIELDS.into_iter().zip(values));
        let sig = signature::sign(&self.config.hash_secret, &canonical)?;
        let fields: Vec<(String, String)> = REQUEST_FIELDS.into_iter().zip(values)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let pay_url = pay_url(&self.config.endpoint, &fields, SIGNATURE_FIELD, &sig)?;
        Ok(SignedRequest { provider: self.provider(), fields, signature: sig, pay_url })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<VerifiedCallback> {
        let provider = self.provider();
        let supplied = payload.require(provider, SIGNATURE_FIELD)?;
        let canonical = signature::canonical_string(CALLBACK_FIELDS.into_iter().map(|f| (f, payload.value(f))));
        if !signature::verify(&self.config.hash_secret, &canonical, supplied)? {
            return Err(EcommerceError::SignatureInvalid { provider });
        }
        if payload.value("bk_MerchantId") != self.config.merchant_id {
            return Err(EcommerceError::MalformedCallback { provider, reason: "merchant id mismatch".into() });
        }
        let result_code = payload.require(provider, "bk_ResponseCode")?.to_string();
        Ok(VerifiedCallback {
            provider,
            order_id: parse_order_id(provider, payload.require(provider, "bk_TxnRef")?)?,
            success: self.is_success(&result_code),
            result_code,
            provider_txn_id: txn_id(payload.get("bk_TransactionNo")),
            amount_minor: parse_amount(provider, payload.require(provider, "bk_Amount")?)?,
            raw: payload.clone(),
        })
    }

    fn is_success(&self, code: &str) -> bool { code.trim() == SUCCESS_CODE }
}

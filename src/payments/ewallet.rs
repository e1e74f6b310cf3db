//! Provider C: e-wallet with separate request and callback keys.
//!
//! The order reference travels as `app_trans_id = yymmdd_<order id, simple form>`.

use crate::domain::value_objects::PaymentProvider;
use crate::payments::signature;
use crate::payments::{
    parse_amount, parse_order_id, pay_url, txn_id, CallbackPayload, GatewayAdapter, PaymentRequest, SignedRequest,
    VerifiedCallback,
};
use crate::{EcommerceError, Result};

pub const SIGNATURE_FIELD: &str = "mac";
pub const SUCCESS_CODE: &str = "1";

const REQUEST_FIELDS: [&str; 7] = ["app_id", "app_trans_id", "app_user", "amount", "app_time", "embed_data", "item"];

const CALLBACK_FIELDS: [&str; 9] = [
    "app_id", "app_trans_id", "app_time", "app_user", "amount",
    "trans_id", "server_time", "channel", "return_code",
];

#[derive(Clone, Debug)]
pub struct EwalletConfig {
    pub app_id: String,
    /// Signs outbound requests.
    pub key1: String,
    /// Verifies callbacks.
    pub key2: String,
    pub endpoint: String,
}

pub struct EwalletGateway { config: EwalletConfig }

impl EwalletGateway {
    pub fn new(config: EwalletConfig) -> Self { Self { config } }
}

fn order_ref(app_trans_id: &str) -> &str {
    app_trans_id.split_once('_').map(|(_, id)| id).unwrap_or(app_trans_id)
}

impl GatewayAdapter for EwalletGateway {
    fn provider(&self) -> PaymentProvider { PaymentProvider::Ewallet }

    fn build_request(&self, request: &PaymentRequest) -> Result<SignedRequest> {
        let amount = self.charge_amount(&request.amount)?.to_string();
        let app_trans_id = format!("{}_{}", request.created_at.format("%y%m%d"), request.order_id.simple());
        let app_time = request.created_at.timestamp_millis().to_string();
        let embed_data = serde_json::json!({ "redirecturl": request.return_url }).to_string();
        let values = [
            self.config.app_id.as_str(), app_trans_id.as_str(), "shopper", amount.as_str(),
            app_time.as_str(), embed_data.as_str(), "[]",
        ];
        let canonical = signature::canonical_string(REQUEST_FIELDS.into_iter().zip(values));
        let sig = signature::sign(&self.config.key1, &canonical)?;
        let mut fields: Vec<(String, String)> = REQUEST_FIELDS.into_iter().zip(values)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        // Sent along but not signed.
        fields.push(("description".into(), request.description.clone()));
        fields.push(("callback_url".into(), request.callback_url.clone()));
        let pay_url = pay_url(&self.config.endpoint, &fields, SIGNATURE_FIELD, &sig)?;
        Ok(SignedRequest { provider: self.provider(), fields, signature: sig, pay_url })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> Result<VerifiedCallback> {
        let provider = self.provider();
        let supplied = payload.require(provider, SIGNATURE_FIELD)?;
        let canonical = signature::canonical_string(CALLBACK_FIELDS.into_iter().map(|f| (f, payload.value(f))));
        if !signature::verify(&self.config.key2, &canonical, supplied)? {
            return Err(EcommerceError::SignatureInvalid { provider });
        }
        if payload.value("app_id") != self.config.app_id {
            return Err(EcommerceError::MalformedCallback { provider, reason: "app id mismatch".into() });
        }
        let result_code = payload.require(provider, "return_code")?.to_string();
        Ok(VerifiedCallback {
            provider,
            order_id: parse_order_id(provider, order_ref(payload.require(provider, "app_trans_id")?))?,
            success: self.is_success(&result_code),
            result_code,
            provider_txn_id: txn_id(payload.get("trans_id")),
            amount_minor: parse_amount(provider, payload.require(provider, "amount")?)?,
            raw: payload.clone(),
        })
    }

    fn is_success(&self, code: &str) -> bool { code.trim() == SUCCESS_CODE }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;
    use crate::domain::value_objects::Money;

    pub(crate) fn gateway() -> EwalletGateway {
        EwalletGateway::new(EwalletConfig {
            app_id: "2553".into(), key1: "ewallet-key1".into(), key2: "ewallet-key2".into(),
            endpoint: "https://ewallet.example/v2/create".into(),
        })
    }

    pub(crate) fn signed_callback(order_id: Uuid, amount: i64, return_code: &str, trans_id: &str) -> CallbackPayload {
        let mut fields = vec![
            ("app_id", "2553".to_string()), ("app_trans_id", format!("240101_{}", order_id.simple())),
            ("app_time", "1700000000000".to_string()), ("app_user", "shopper".to_string()),
            ("amount", amount.to_string()), ("trans_id", trans_id.to_string()),
            ("server_time", "1700000001000".to_string()), ("channel", "38".to_string()),
            ("return_code", return_code.to_string()),
        ];
        let canonical = signature::canonical_string(fields.iter().map(|(k, v)| (*k, v.as_str())));
        fields.push((SIGNATURE_FIELD, signature::sign("ewallet-key2", &canonical).unwrap()));
        CallbackPayload::from_fields(fields)
    }

    #[test]
    fn test_build_request_signs_with_key1() {
        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let req = PaymentRequest {
            order_id, amount: Money::new(Decimal::new(120000, 0), "VND"), description: "Order".into(),
            return_url: "https://shop.example/r".into(), callback_url: "https://api.example/cb".into(),
            created_at: now, expires_at: now,
        };
        let signed = gateway().build_request(&req).unwrap();
        let canonical = signature::canonical_string(
            signed.fields.iter().filter(|(k, _)| REQUEST_FIELDS.contains(&k.as_str())).map(|(k, v)| (k.as_str(), v.as_str())),
        );
        assert!(signature::verify("ewallet-key1", &canonical, &signed.signature).unwrap());
        assert!(!signature::verify("ewallet-key2", &canonical, &signed.signature).unwrap());
        let trans = signed.fields.iter().find(|(k, _)| k == "app_trans_id").unwrap();
        assert_eq!(order_ref(&trans.1), order_id.simple().to_string());
    }

    #[test]
    fn test_verify_callback() {
        let order_id = Uuid::new_v4();
        let v = gateway().verify_callback(&signed_callback(order_id, 120000, "1", "2401010000123")).unwrap();
        assert!(v.success);
        assert_eq!(v.order_id, order_id);
        assert!(!gateway().is_success("0"));
        assert!(!gateway().is_success("00"));
    }

    #[test]
    fn test_callback_signed_with_request_key_rejected() {
        let order_id = Uuid::new_v4();
        let mut fields = vec![
            ("app_id", "2553".to_string()), ("app_trans_id", format!("240101_{}", order_id.simple())),
            ("amount", "1".to_string()), ("return_code", "1".to_string()),
        ];
        let canonical = signature::canonical_string(CALLBACK_FIELDS.into_iter().map(|f| {
            (f, fields.iter().find(|(k, _)| *k == f).map(|(_, v)| v.as_str()).unwrap_or(""))
        }));
        fields.push((SIGNATURE_FIELD, signature::sign("ewallet-key1", &canonical).unwrap()));
        let err = gateway().verify_callback(&CallbackPayload::from_fields(fields)).unwrap_err();
        assert!(matches!(err, EcommerceError::SignatureInvalid { provider: PaymentProvider::Ewallet }));
    }
}

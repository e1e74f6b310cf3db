//! Payment gateway adapters.
//!
//! Each provider signs a fixed, provider-specific field list joined as
//! `key=value&...` with HMAC-SHA256. The three adapters share the signing
//! primitives in [`signature`] but keep their own field orders, signature field
//! names and success codes; those are not interchangeable.

pub mod bank;
pub mod ewallet;
pub mod signature;
pub mod wallet;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;
use crate::domain::aggregates::PaymentResult;
use crate::domain::value_objects::{Money, PaymentProvider};
use crate::{EcommerceError, Result};

pub use bank::{BankConfig, BankGateway};
pub use ewallet::{EwalletConfig, EwalletGateway};
pub use wallet::{WalletConfig, WalletGateway};

/// Everything a gateway needs to open a payment for one order.
#[derive(Clone, Debug)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub amount: Money,
    pub description: String,
    /// Where the gateway sends the shopper's browser afterwards.
    pub return_url: String,
    /// Server-to-server notification endpoint.
    pub callback_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outbound request with its signature, plus the URL the shopper is sent to.
#[derive(Clone, Debug)]
pub struct SignedRequest {
    pub provider: PaymentProvider,
    pub fields: Vec<(String, String)>,
    pub signature: String,
    pub pay_url: String,
}

/// Flat view of a callback's native fields, whatever the wire format was.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    fields: BTreeMap<String, String>,
}

impl CallbackPayload {
    pub fn from_fields<K: Into<String>, V: Into<String>>(fields: impl IntoIterator<Item = (K, V)>) -> Self {
        Self { fields: fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    /// Flattens a JSON object. Scalars keep their textual form, `null` becomes
    /// empty and nested values are kept as compact JSON.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let fields = object.iter().map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), text)
        });
        Some(Self { fields: fields.collect() })
    }

    pub fn get(&self, name: &str) -> Option<&str> { self.fields.get(name).map(String::as_str) }

    /// Field value, or empty when absent. Canonical strings sign absent fields as empty.
    pub fn value(&self, name: &str) -> &str { self.get(name).unwrap_or_default() }

    pub fn require(&self, provider: PaymentProvider, name: &str) -> Result<&str> {
        self.get(name).filter(|v| !v.is_empty()).ok_or_else(|| EcommerceError::MalformedCallback {
            provider, reason: format!("missing {name}"),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))).collect())
    }
}

/// A callback whose signature checked out.
#[derive(Clone, Debug)]
pub struct VerifiedCallback {
    pub provider: PaymentProvider,
    pub order_id: Uuid,
    pub result_code: String,
    pub success: bool,
    pub provider_txn_id: Option<String>,
    /// Amount in the provider's minor unit, see [`GatewayAdapter::amount_scale`].
    pub amount_minor: i64,
    pub raw: CallbackPayload,
}

impl VerifiedCallback {
    pub fn payment_result(&self) -> PaymentResult {
        PaymentResult {
            provider: self.provider,
            transaction_id: self.provider_txn_id.clone(),
            result_code: self.result_code.clone(),
            amount_minor: self.amount_minor,
            raw: self.raw.to_json(),
        }
    }
}

pub trait GatewayAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Decimal places the provider shifts amounts by before sending them.
    fn amount_scale(&self) -> u32 { 0 }

    /// The integer the provider is asked to charge for `amount`. Amounts with
    /// more precision than [`Self::amount_scale`] are refused, never rounded.
    fn charge_amount(&self, amount: &Money) -> Result<i64> {
        amount.minor_units(self.amount_scale()).ok_or_else(|| EcommerceError::UnchargeableAmount {
            provider: self.provider(),
            amount: amount.amount(),
            currency: amount.currency().to_string(),
        })
    }

    fn build_request(&self, request: &PaymentRequest) -> Result<SignedRequest>;

    /// Rebuilds the canonical string from the inbound fields and checks the
    /// signature. Any mismatch is [`EcommerceError::SignatureInvalid`].
    fn verify_callback(&self, payload: &CallbackPayload) -> Result<VerifiedCallback>;

    fn is_success(&self, code: &str) -> bool;
}

/// The configured adapters, selected by provider tag.
#[derive(Default)]
pub struct Gateways {
    wallet: Option<WalletGateway>,
    bank: Option<BankGateway>,
    ewallet: Option<EwalletGateway>,
}

impl Gateways {
    pub fn new(wallet: Option<WalletGateway>, bank: Option<BankGateway>, ewallet: Option<EwalletGateway>) -> Self {
        Self { wallet, bank, ewallet }
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<&dyn GatewayAdapter> {
        let adapter: Option<&dyn GatewayAdapter> = match provider {
            PaymentProvider::Wallet => self.wallet.as_ref().map(|g| g as &dyn GatewayAdapter),
            PaymentProvider::Bank => self.bank.as_ref().map(|g| g as &dyn GatewayAdapter),
            PaymentProvider::Ewallet => self.ewallet.as_ref().map(|g| g as &dyn GatewayAdapter),
        };
        adapter.ok_or_else(|| EcommerceError::UnsupportedPaymentMethod(provider.to_string()))
    }

    pub fn enabled(&self) -> Vec<PaymentProvider> {
        PaymentProvider::ALL.into_iter().filter(|p| self.get(*p).is_ok()).collect()
    }
}

/// Appends `fields` and the signature as query parameters to `endpoint`.
pub(crate) fn pay_url(endpoint: &str, fields: &[(String, String)], signature_field: &str, signature: &str) -> Result<String> {
    let mut url = Url::parse(endpoint).map_err(|e| EcommerceError::PaymentConfig(format!("{endpoint}: {e}")))?;
    url.query_pairs_mut()
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair(signature_field, signature);
    Ok(url.into())
}

/// Providers report "no transaction" as an absent, empty or zero id.
pub(crate) fn txn_id(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty() && *v != "0").map(str::to_string)
}

pub(crate) fn parse_amount(provider: PaymentProvider, value: &str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|_| EcommerceError::MalformedCallback { provider, reason: format!("bad amount {value:?}") })
}

pub(crate) fn parse_order_id(provider: PaymentProvider, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|_| EcommerceError::MalformedCallback { provider, reason: format!("bad order reference {value:?}") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_json_flattens_scalars() {
        let payload = CallbackPayload::from_json(&serde_json::json!({
            "orderId": "abc", "amount": 50000, "resultCode": 0, "extraData": null, "ok": true
        })).unwrap();
        assert_eq!(payload.value("amount"), "50000");
        assert_eq!(payload.value("resultCode"), "0");
        assert_eq!(payload.value("extraData"), "");
        assert_eq!(payload.value("ok"), "true");
        assert_eq!(payload.value("missing"), "");
        assert!(CallbackPayload::from_json(&serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn test_require_rejects_empty() {
        let payload = CallbackPayload::from_fields([("a", "")]);
        assert!(matches!(payload.require(PaymentProvider::Bank, "a"), Err(EcommerceError::MalformedCallback { .. })));
    }

    #[test]
    fn test_txn_id_normalisation() {
        assert_eq!(txn_id(Some(" 123 ")), Some("123".into()));
        assert_eq!(txn_id(Some("0")), None);
        assert_eq!(txn_id(Some("")), None);
        assert_eq!(txn_id(None), None);
    }

    #[test]
    fn test_pay_url_encodes_values() {
        let url = pay_url("https://pay.example/checkout", &[("info".into(), "a b&c".into())], "sig", "ff").unwrap();
        assert_eq!(url, "https://pay.example/checkout?info=a+b%26c&sig=ff");
        assert!(pay_url("not a url", &[], "sig", "ff").is_err());
    }

    #[test]
    fn test_unconfigured_provider_is_unsupported() {
        let gateways = Gateways::default();
        assert!(gateways.enabled().is_empty());
        assert!(matches!(gateways.get(PaymentProvider::Wallet), Err(EcommerceError::UnsupportedPaymentMethod(_))));
    }
}

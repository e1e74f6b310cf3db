//! Environment configuration.

use anyhow::{Context, Result};
use chrono::Duration;
use std::env;
use crate::payments::{BankConfig, EwalletConfig, WalletConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat { Pretty, Json }

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs on the in-process store.
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub port: u16,
    pub log_format: LogFormat,
    pub public_base_url: String,
    pub reservation_ttl: Duration,
    pub cart_retention: Duration,
    pub cleanup_interval: std::time::Duration,
    pub payment_timeout: Duration,
    pub wallet: Option<WalletConfig>,
    pub bank: Option<BankConfig>,
    pub ewallet: Option<EwalletConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> { Self::from_lookup(|k| env::var(k).ok()) }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let num = |k: &str, default: u64| -> Result<u64> {
            var(k).map(|v| v.parse::<u64>().with_context(|| format!("{k} must be a non-negative integer, got {v:?}"))).transpose().map(|v| v.unwrap_or(default))
        };
        let secs = |k: &str, default: u64| -> Result<Duration> {
            let n = num(k, default)?;
            let n = i64::try_from(n).with_context(|| format!("{k} is too large"))?;
            Ok(Duration::seconds(n))
        };

        let port = u16::try_from(num("PORT", 8083)?).context("PORT out of range")?;
        let log_format = match var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let public_base_url = var("PUBLIC_BASE_URL").unwrap_or_else(|| format!("http://localhost:{port}"));
        let cleanup_interval = std::time::Duration::from_secs(num("CLEANUP_INTERVAL_SECS", 60)?.max(1));
        let cart_retention = Duration::days(i64::try_from(num("CART_RETENTION_DAYS", 7)?).context("CART_RETENTION_DAYS is too large")?);

        // A provider is enabled only when its credentials and endpoint are all present.
        let wallet = match (var("WALLET_PARTNER_CODE"), var("WALLET_ACCESS_KEY"), var("WALLET_SECRET_KEY"), var("WALLET_ENDPOINT")) {
            (Some(partner_code), Some(access_key), Some(secret_key), Some(endpoint)) => Some(WalletConfig { partner_code, access_key, secret_key, endpoint }),
            _ => None,
        };
        let bank = match (var("BANK_MERCHANT_ID"), var("BANK_HASH_SECRET"), var("BANK_ENDPOINT")) {
            (Some(merchant_id), Some(hash_secret), Some(endpoint)) => Some(BankConfig {
                merchant_id, hash_secret, endpoint, locale: var("BANK_LOCALE").unwrap_or_else(|| "en".into()),
            }),
            _ => None,
        };
        let ewallet = match (var("EWALLET_APP_ID"), var("EWALLET_KEY1"), var("EWALLET_KEY2"), var("EWALLET_ENDPOINT")) {
            (Some(app_id), Some(key1), Some(key2), Some(endpoint)) => Some(EwalletConfig { app_id, key1, key2, endpoint }),
            _ => None,
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
            port, log_format, public_base_url,
            reservation_ttl: secs("RESERVATION_TTL_SECS", 900)?,
            cart_retention, cleanup_interval,
            payment_timeout: secs("PAYMENT_TIMEOUT_SECS", 900)?,
            wallet, bank, ewallet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = load(&[]).unwrap();
        assert_eq!(c.port, 8083);
        assert_eq!(c.reservation_ttl, Duration::minutes(15));
        assert_eq!(c.cart_retention, Duration::days(7));
        assert_eq!(c.cleanup_interval, std::time::Duration::from_secs(60));
        assert_eq!(c.log_format, LogFormat::Pretty);
        assert!(c.database_url.is_none());
        assert!(c.wallet.is_none() && c.bank.is_none() && c.ewallet.is_none());
    }

    #[test]
    fn test_provider_needs_every_secret() {
        let c = load(&[("BANK_MERCHANT_ID", "M1"), ("WALLET_PARTNER_CODE", "P"), ("WALLET_ACCESS_KEY", "A")]).unwrap();
        assert!(c.wallet.is_none());
        assert!(c.bank.is_none());
        let c = load(&[("BANK_MERCHANT_ID", "M1"), ("BANK_HASH_SECRET", "s"), ("BANK_ENDPOINT", "https://bank.example/pay"), ("LOG_FORMAT", "json")]).unwrap();
        assert_eq!(c.bank.unwrap().merchant_id, "M1");
        assert_eq!(c.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_garbage_numbers() {
        assert!(load(&[("RESERVATION_TTL_SECS", "soon")]).is_err());
        assert!(load(&[("PORT", "70000")]).is_err());
    }
}

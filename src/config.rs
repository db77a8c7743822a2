use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::Address;

use crate::contracts::ContractAddresses;
use crate::positions::DATA_API_URL;
use crate::wallet::{ConfigurationError, SignatureKind, WalletDescriptor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Redeem every redeemable position of the selected wallets once, then exit.
    #[arg(long, conflicts_with = "monitor")]
    pub redeem: bool,

    #[arg(long, requires = "redeem")]
    pub condition_id: Option<String>,

    /// Only act on wallets matching this name or address. Repeatable.
    #[arg(short, long)]
    pub wallet: Vec<String>,

    /// Poll and redeem continuously until interrupted.
    #[arg(long)]
    pub monitor: bool,

    /// Read balances and log what would be redeemed without sending anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub polymarket: PolymarketConfig,
    #[serde(default)]
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
    #[serde(default)]
    pub auto_redeem: AutoRedeemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymarketConfig {
    #[serde(default = "default_data_api_url")]
    pub data_api_url: String,
    /// Polygon RPC URLs, tried in order as fallbacks for reads and redemption.
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: Vec<String>,
    /// How long to wait for a sent transaction to be mined.
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

fn default_data_api_url() -> String {
    DATA_API_URL.to_string()
}

fn default_rpc_urls() -> Vec<String> {
    vec![
        "https://1rpc.io/matic".to_string(),
        "https://poly.api.pocket.network".to_string(),
    ]
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            data_api_url: default_data_api_url(),
            rpc_urls: default_rpc_urls(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
        }
    }
}

impl PolymarketConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs.max(1))
    }
}

/// One managed wallet. The private key is never stored here; `private_key_env`
/// names the environment variable that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub name: String,
    /// Signing EOA address.
    pub address: String,
    #[serde(default)]
    pub proxy_wallet_address: Option<String>,
    /// 0 = EOA, 1 = Polymarket proxy, 2 = Gnosis Safe.
    #[serde(default)]
    pub signature_type: u8,
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

fn default_private_key_env() -> String {
    "POLYMARKET_PRIVATE_KEY".to_string()
}

fn parse_address(wallet: &str, field: &'static str, value: &str) -> Result<Address, ConfigurationError> {
    value.trim().parse().map_err(|_| ConfigurationError::InvalidAddress {
        wallet: wallet.to_string(),
        field,
        value: value.to_string(),
    })
}

impl WalletConfig {
    pub fn signature_kind(&self) -> Result<SignatureKind, ConfigurationError> {
        SignatureKind::try_from(self.signature_type)
    }

    pub fn signing_address(&self) -> Result<Address, ConfigurationError> {
        parse_address(&self.name, "address", &self.address)
    }

    /// Builds the descriptor. `discovered_proxy` is used when the config has no
    /// proxy address; the resolver still rejects a relayed wallet without one.
    pub fn descriptor(&self, discovered_proxy: Option<Address>) -> Result<WalletDescriptor, ConfigurationError> {
        let proxy_address = match self.proxy_wallet_address.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(parse_address(&self.name, "proxy_wallet_address", raw)?),
            _ => discovered_proxy,
        };
        let signature_type = self.signature_kind()?;
        Ok(WalletDescriptor {
            name: self.name.clone(),
            signing_address: self.signing_address()?,
            proxy_address: if signature_type == SignatureKind::Eoa {
                None
            } else {
                proxy_address
            },
            signature_type,
        })
    }

    /// A proxy-factory call executes from the signer's derived proxy, whatever
    /// address the config names. Rejects a configured proxy that differs.
    pub fn verify_derived_proxy(
        &self,
        descriptor: &WalletDescriptor,
        derived: Option<Address>,
    ) -> Result<(), ConfigurationError> {
        if descriptor.signature_type != SignatureKind::PolyProxy {
            return Ok(());
        }
        match (descriptor.proxy_address, derived) {
            (Some(configured), Some(derived)) if configured != derived => Err(ConfigurationError::ProxyMismatch {
                wallet: self.name.clone(),
                configured,
                derived,
            }),
            _ => Ok(()),
        }
    }

    pub fn needs_proxy_lookup(&self) -> bool {
        self.signature_type != 0
            && self
                .proxy_wallet_address
                .as_deref()
                .map(|p| p.trim().is_empty())
                .unwrap_or(true)
    }

    /// Reads the key from the environment. Errors name the variable only.
    pub fn private_key(&self) -> Result<String> {
        let key = std::env::var(&self.private_key_env)
            .with_context(|| format!("wallet '{}': environment variable {} is not set", self.name, self.private_key_env))?;
        if key.trim().is_empty() {
            anyhow::bail!("wallet '{}': environment variable {} is empty", self.name, self.private_key_env);
        }
        Ok(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRedeemConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds before a condition is retried after an attempt, successful or not.
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
    /// Wallet names or addresses to watch. Empty means all.
    #[serde(default)]
    pub include_wallets: Vec<String>,
    #[serde(default)]
    pub exclude_wallets: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_poll_interval_secs() -> u64 {
    60
}
fn default_cool_down_secs() -> u64 {
    600
}

impl Default for AutoRedeemConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: default_poll_interval_secs(),
            cool_down_secs: default_cool_down_secs(),
            include_wallets: Vec::new(),
            exclude_wallets: Vec::new(),
            dry_run: false,
        }
    }
}

impl AutoRedeemConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs.max(1))
    }
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            let config = Config::default();
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write default config to {}", path.display()))?;
            Ok(config)
        }
    }

    /// Wallets matching any of `identifiers`, or all wallets when empty.
    pub fn select_wallets(&self, identifiers: &[String]) -> Vec<&WalletConfig> {
        self.wallets
            .iter()
            .filter(|w| identifiers.is_empty() || identifiers.iter().any(|id| w.matches_identifier(id)))
            .collect()
    }
}

impl WalletConfig {
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let needle = identifier.trim().to_lowercase();
        !needle.is_empty()
            && (self.name.to_lowercase() == needle
                || self.address.trim().to_lowercase() == needle
                || self
                    .proxy_wallet_address
                    .as_deref()
                    .map(|p| p.trim().to_lowercase() == needle)
                    .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use serde_json::json;

    use super::*;
    use crate::contracts::NEG_RISK_ADAPTER;

    fn wallet(value: serde_json::Value) -> WalletConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.polymarket.data_api_url, DATA_API_URL);
        assert_eq!(config.polymarket.rpc_urls.len(), 2);
        assert_eq!(config.contracts.operator(), NEG_RISK_ADAPTER);
        assert!(config.wallets.is_empty());
        assert_eq!(config.auto_redeem.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.auto_redeem.cool_down(), Duration::from_secs(600));
        assert!(!config.auto_redeem.dry_run);
    }

    #[test]
    fn safe_wallet_builds_relayed_descriptor() {
        let w = wallet(json!({
            "name": "main",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
            "proxy_wallet_address": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2",
            "signature_type": 2
        }));

        let descriptor = w.descriptor(None).unwrap();
        assert_eq!(descriptor.signature_type, SignatureKind::GnosisSafe);
        assert_eq!(descriptor.proxy_address, Some(address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2")));
        assert_eq!(w.private_key_env, "POLYMARKET_PRIVATE_KEY");
        assert!(!w.needs_proxy_lookup());
    }

    #[test]
    fn missing_proxy_uses_discovered_address() {
        let w = wallet(json!({
            "name": "proxy",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
            "signature_type": 1
        }));
        assert!(w.needs_proxy_lookup());

        let discovered = address!("0xcccccccccccccccccccccccccccccccccccccc03");
        assert_eq!(w.descriptor(Some(discovered)).unwrap().proxy_address, Some(discovered));
        assert_eq!(w.descriptor(None).unwrap().proxy_address, None);
    }

    #[test]
    fn eoa_wallet_ignores_proxy_address() {
        let w = wallet(json!({
            "name": "eoa",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
            "proxy_wallet_address": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2"
        }));
        let descriptor = w.descriptor(None).unwrap();
        assert_eq!(descriptor.signature_type, SignatureKind::Eoa);
        assert_eq!(descriptor.proxy_address, None);
        assert!(!w.needs_proxy_lookup());
    }

    #[test]
    fn invalid_wallet_fields_are_configuration_errors() {
        let bad_type = wallet(json!({ "name": "x", "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1", "signature_type": 5 }));
        assert_eq!(bad_type.descriptor(None).unwrap_err(), ConfigurationError::UnknownSignatureType(5));

        let bad_address = wallet(json!({ "name": "x", "address": "0x1234" }));
        assert!(matches!(
            bad_address.descriptor(None).unwrap_err(),
            ConfigurationError::InvalidAddress { field: "address", .. }
        ));
    }

    #[test]
    fn private_key_error_names_the_variable() {
        let w = wallet(json!({
            "name": "eoa",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
            "private_key_env": "POLYREDEEM_TEST_KEY_THAT_IS_NOT_SET"
        }));
        let err = w.private_key().unwrap_err().to_string();
        assert!(err.contains("POLYREDEEM_TEST_KEY_THAT_IS_NOT_SET"));
    }

    #[test]
    fn wallets_are_selected_by_name_or_address() {
        let config: Config = serde_json::from_value(json!({
            "wallets": [
                { "name": "Main", "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1" },
                { "name": "side", "address": "0xdddddddddddddddddddddddddddddddddddddd04",
                  "proxy_wallet_address": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2", "signature_type": 1 }
            ]
        }))
        .unwrap();

        assert_eq!(config.select_wallets(&[]).len(), 2);
        let by_name = config.select_wallets(&["main".to_string()]);
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "Main");
        let by_proxy = config.select_wallets(&["0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB2".to_string()]);
        assert_eq!(by_proxy[0].name, "side");
    }

    #[test]
    fn load_writes_default_when_missing() {
        let path = std::env::temp_dir().join(format!("polyredeem-config-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert!(config.wallets.is_empty());

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.polymarket.rpc_urls, config.polymarket.rpc_urls);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn configured_proxy_must_match_derived_proxy() {
        let w = wallet(json!({
            "name": "proxy",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
            "proxy_wallet_address": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2",
            "signature_type": 1
        }));
        let configured = address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2");
        let other = address!("0xcccccccccccccccccccccccccccccccccccccc03");
        let descriptor = w.descriptor(Some(other)).unwrap();
        assert_eq!(descriptor.proxy_address, Some(configured));

        assert_eq!(
            w.verify_derived_proxy(&descriptor, Some(other)).unwrap_err(),
            ConfigurationError::ProxyMismatch {
                wallet: "proxy".into(),
                configured,
                derived: other,
            }
        );
        assert!(w.verify_derived_proxy(&descriptor, Some(configured)).is_ok());
    }

    #[test]
    fn safe_wallets_skip_derived_proxy_check() {
        let w = wallet(json!({
            "name": "safe",
            "address": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1",
            "proxy_wallet_address": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2",
            "signature_type": 2
        }));
        let descriptor = w.descriptor(None).unwrap();
        let other = address!("0xcccccccccccccccccccccccccccccccccccccc03");
        assert!(w.verify_derived_proxy(&descriptor, Some(other)).is_ok());
    }

    #[test]
    fn zero_cool_down_is_clamped_to_one_second() {
        let settings: AutoRedeemConfig = serde_json::from_value(json!({ "cool_down_secs": 0, "poll_interval_secs": 0 })).unwrap();
        assert_eq!(settings.cool_down(), Duration::from_secs(1));
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
    }
}

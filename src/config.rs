//! Configuration for the relay server.
//!
//! The configuration file is JSON, located by `--config` or the `CONFIG`
//! environment variable. String values wrapped in [`LiteralOrEnv`] may refer to
//! environment variables, which keeps keys out of the file:
//!
//! ```json
//! {
//!   "port": 8080,
//!   "domain": {
//!     "name": "MetaTxEngine",
//!     "version": "1",
//!     "chainId": 31337,
//!     "verifyingAccount": "0x00000000000000000000000000000000000E4E11"
//!   },
//!   "admin": "$ADMIN_ADDRESS",
//!   "relayer": { "signer": "${RELAYER_PRIVATE_KEY}" },
//!   "relayers": [],
//!   "features": { "batch": true, "tokenFeeFallback": true },
//!   "wallet": { "template": "0x6080604052" },
//!   "genesis": { "balances": { "0x...": "1000000" } }
//! }
//! ```

use alloy_primitives::{Address, B256, Bytes};
use alloy_signer_local::PrivateKeySigner;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::EngineConfig;
use crate::hasher::DomainConfig;
use crate::host::LedgerError;
use crate::types::{ChecksummedAddress, DecimalU256};

#[derive(Parser, Debug)]
#[command(name = "metatx-relay")]
#[command(about = "Meta-transaction relay HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    domain: DomainConfig,
    admin: LiteralOrEnv<ChecksummedAddress>,
    relayer: RelayerConfig,
    #[serde(default)]
    relayers: Vec<LiteralOrEnv<ChecksummedAddress>>,
    #[serde(default)]
    fee_recipient: Option<LiteralOrEnv<ChecksummedAddress>>,
    #[serde(default)]
    features: FeaturesConfig,
    wallet: WalletConfig,
    #[serde(default)]
    genesis: GenesisConfig,
}

/// Identity this server submits requests as.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub signer: LiteralOrEnv<EvmPrivateKey>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesConfig {
    #[serde(default = "config_defaults::default_batch")]
    pub batch: bool,
    #[serde(default)]
    pub token_fee_fallback: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            batch: config_defaults::default_batch(),
            token_fee_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Wallet creation code; the principal is appended ABI-encoded.
    pub template: Bytes,
}

/// Initial state of the in-memory ledger.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisConfig {
    /// Native balances by account.
    #[serde(default)]
    pub balances: HashMap<ChecksummedAddress, DecimalU256>,
    /// Token holdings: token address to holder to amount.
    #[serde(default)]
    pub tokens: HashMap<ChecksummedAddress, HashMap<ChecksummedAddress, DecimalU256>>,
}

/// A validated 32-byte secp256k1 private key.
#[derive(Clone, Copy)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}

/// A value given either literally or as `$VAR` / `${VAR}`, resolved while deserializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    fn env_var_name(s: &str) -> Option<&str> {
        if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            return Some(name);
        }
        let name = s.strip_prefix('$')?;
        if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            Some(name)
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = match Self::env_var_name(&s) {
            Some(name) => std::env::var(name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    name, s
                ))
            })?,
            None => s,
        };
        value
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 8080;

    /// `$PORT`, then 8080.
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// `$HOST`, then 0.0.0.0.
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn default_batch() -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Invalid relayer key: {0}")]
    InvalidKey(String),
    #[error("Invalid genesis state: {0}")]
    Genesis(#[from] LedgerError),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn domain(&self) -> &DomainConfig {
        &self.domain
    }

    pub fn admin(&self) -> Address {
        self.admin.0.into()
    }

    pub fn features(&self) -> FeaturesConfig {
        self.features
    }

    pub fn genesis(&self) -> &GenesisConfig {
        &self.genesis
    }

    pub fn relayer_signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        PrivateKeySigner::from_bytes(&B256::from(*self.relayer.signer.as_bytes()))
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))
    }

    /// Engine parameters. The server's own relayer is always authorized.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let own = self.relayer_signer()?.address();
        let mut relayers: Vec<Address> = self.relayers.iter().map(|r| r.0.into()).collect();
        if !relayers.contains(&own) {
            relayers.push(own);
        }
        Ok(EngineConfig {
            domain: self.domain.clone(),
            admin: self.admin(),
            relayers,
            fee_recipient: self.fee_recipient.as_ref().map(|r| r.0.into()),
            batch_enabled: self.features.batch,
            token_fee_fallback: self.features.token_fee_fallback,
            wallet_template: self.wallet.template.clone(),
        })
    }

    /// Loads the file named by `--config` / `$CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }
}

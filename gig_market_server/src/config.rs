//! Server configuration, loaded from `GMB_*` environment variables with logged defaults.
use std::{env, time::Duration};

use gig_market_engine::{
    db_types::ContractAddress,
    dispatch::DispatchConfig,
    sync::TrackedContracts,
};
use gmb_common::{parse_boolean_flag, Secret};
use log::*;

const DEFAULT_GMB_HOST: &str = "127.0.0.1";
const DEFAULT_GMB_PORT: u16 = 8480;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
const DEFAULT_SYNC_PAGE_SIZE: usize = 20;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The three on-chain contracts the sync engine follows.
    pub contracts: TrackedContracts,
    pub sync_interval: Duration,
    pub sync_page_size: usize,
    /// When false the server starts without the scheduler and dispatcher. Useful for serving reads off a
    /// database another instance keeps in sync.
    pub run_workers: bool,
    pub dispatch: DispatchConfig,
    pub gateway: ChainGatewayConfig,
    pub delivery: DeliveryConfig,
}

/// Connection settings for the ledger gateway the chain reader talks to.
#[derive(Clone, Debug)]
pub struct ChainGatewayConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub timeout: Duration,
}

impl Default for ChainGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            api_key: Secret::default(),
            timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS),
        }
    }
}

/// The messaging front-end webhook notifications are delivered to.
#[derive(Clone, Debug, Default)]
pub struct DeliveryConfig {
    pub webhook_url: String,
    pub auth_token: Secret<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_GMB_HOST.to_string(),
            port: DEFAULT_GMB_PORT,
            database_url: String::default(),
            contracts: TrackedContracts::new(
                ContractAddress::from(""),
                ContractAddress::from(""),
                ContractAddress::from(""),
            ),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            sync_page_size: DEFAULT_SYNC_PAGE_SIZE,
            run_workers: true,
            dispatch: DispatchConfig::default(),
            gateway: ChainGatewayConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("GMB_HOST").ok().unwrap_or_else(|| DEFAULT_GMB_HOST.into());
        let port = env::var("GMB_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for GMB_PORT. {e} Using the default, {DEFAULT_GMB_PORT}, instead."
                    );
                    DEFAULT_GMB_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_GMB_PORT);
        let database_url = env::var("GMB_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ GMB_DATABASE_URL is not set. Please set it to the URL for the marketplace database.");
            String::default()
        });
        let contracts = TrackedContracts::new(
            contract_from_env("GMB_JOB_REGISTRY_CONTRACT"),
            contract_from_env("GMB_ESCROW_CONTRACT"),
            contract_from_env("GMB_REPUTATION_CONTRACT"),
        );
        let sync_interval = Duration::from_secs(u64_from_env("GMB_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS));
        let sync_page_size =
            u64_from_env("GMB_SYNC_PAGE_SIZE", DEFAULT_SYNC_PAGE_SIZE as u64) as usize;
        let run_workers = parse_boolean_flag(env::var("GMB_RUN_WORKERS").ok(), true);
        let mut dispatch = DispatchConfig::default();
        dispatch.max_attempts = u64_from_env("GMB_DISPATCH_MAX_ATTEMPTS", dispatch.max_attempts as u64) as i64;
        dispatch.workers = u64_from_env("GMB_DISPATCH_WORKERS", dispatch.workers as u64) as usize;
        let gateway = ChainGatewayConfig::from_env_or_default();
        let delivery = DeliveryConfig::from_env_or_default();
        Self {
            host,
            port,
            database_url,
            contracts,
            sync_interval,
            sync_page_size,
            run_workers,
            dispatch,
            gateway,
            delivery,
        }
    }
}

impl ChainGatewayConfig {
    pub fn from_env_or_default() -> Self {
        let defaults = Self::default();
        let base_url = env::var("GMB_GATEWAY_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ GMB_GATEWAY_URL is not set. Using the default, {}.", defaults.base_url);
            defaults.base_url.clone()
        });
        let api_key = env::var("GMB_GATEWAY_API_KEY").map(Secret::new).unwrap_or_else(|_| {
            warn!("🪛️ GMB_GATEWAY_API_KEY is not set. Gateway requests will be unauthenticated.");
            Secret::default()
        });
        let timeout = Duration::from_secs(u64_from_env("GMB_GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS));
        Self { base_url, api_key, timeout }
    }
}

impl DeliveryConfig {
    pub fn from_env_or_default() -> Self {
        let webhook_url = env::var("GMB_WEBHOOK_URL").ok().unwrap_or_else(|| {
            error!("🪛️ GMB_WEBHOOK_URL is not set. Notification delivery will fail until it is configured.");
            String::default()
        });
        let auth_token = env::var("GMB_WEBHOOK_TOKEN").map(Secret::new).unwrap_or_default();
        Self { webhook_url, auth_token }
    }
}

fn contract_from_env(var: &str) -> ContractAddress {
    let address = env::var(var).unwrap_or_else(|_| {
        error!("🪛️ {var} is not set. The contract will not sync until it is configured.");
        String::default()
    });
    ContractAddress::from(address)
}

fn u64_from_env(var: &str, default: u64) -> u64 {
    env::var(var)
        .map(|s| {
            s.parse::<u64>().unwrap_or_else(|e| {
                error!("🪛️ {s} is not a valid value for {var}. {e} Using the default, {default}, instead.");
                default
            })
        })
        .ok()
        .unwrap_or(default)
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::chain::ChainFamily;
use crate::custody::DepositRoute;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; in-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    /// RPC endpoints per chain family, tried in order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub custody: CustodyConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Order actor tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound on the synchronous wait after sending a release transaction
    pub send_max_wait_ms: u64,
    /// Poll cadence during that wait
    pub send_poll_delay_ms: u64,
    /// `ToStartTransfer` visits allowed before a failed order is forced to `Failed`
    pub max_transfer_retries: usize,
    /// Consecutive self-driven transitions per input
    pub max_drive_steps: usize,
    /// Delay before the sanity-check watchdog inspects an order
    pub watchdog_delay_secs: u64,
    /// Budget for a single best-effort alarm
    pub alarm_timeout_ms: u64,
    /// Alarm when the drive-step guard trips
    pub alarm_on_stuck: bool,
    /// Order time-to-live, sets `expire_time`
    pub order_ttl_secs: u64,
    /// Per-actor inbox capacity
    pub actor_inbox_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_max_wait_ms: 10_000,
            send_poll_delay_ms: 1_000,
            max_transfer_retries: 5,
            max_drive_steps: 100,
            watchdog_delay_secs: 3_600,
            alarm_timeout_ms: 3_000,
            alarm_on_stuck: true,
            order_ttl_secs: 7 * 24 * 3_600,
            actor_inbox_size: 64,
        }
    }
}

impl RelayConfig {
    pub fn send_max_wait(&self) -> Duration {
        Duration::from_millis(self.send_max_wait_ms)
    }

    pub fn send_poll_delay(&self) -> Duration {
        Duration::from_millis(self.send_poll_delay_ms)
    }

    pub fn alarm_timeout(&self) -> Duration {
        Duration::from_millis(self.alarm_timeout_ms)
    }
}

/// Fixed-period loop timing
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub initial_delay_ms: u64,
    pub period_ms: u64,
}

impl TimerConfig {
    pub const fn new(initial_delay_ms: u64, period_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            period_ms,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimersConfig {
    /// Confirmation polling for ordinary transfers
    pub confirm_normal: TimerConfig,
    /// Confirmation polling after a swap-to-main-chain
    pub confirm_fast: TimerConfig,
    /// Consecutive not-found polls before a watched transaction counts as failed
    pub max_not_found: u32,
    pub retry: TimerConfig,
    /// Delay between a retry being scheduled and the order being re-driven
    pub retry_delay_ms: u64,
    pub watchdog: TimerConfig,
    pub custody_poll: TimerConfig,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            confirm_normal: TimerConfig::new(10_000, 10_000),
            confirm_fast: TimerConfig::new(2_000, 2_000),
            max_not_found: 5,
            retry: TimerConfig::new(5_000, 5_000),
            retry_delay_ms: 30_000,
            watchdog: TimerConfig::new(60_000, 60_000),
            custody_poll: TimerConfig::new(30_000, 30_000),
        }
    }
}

impl TimersConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Destination chain settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain_id: String,
    pub network: String,
    pub family: ChainFamily,
    /// Account that releases assets on this chain
    pub release_account: String,
    /// Contract name passed to `contract_address`
    #[serde(default = "default_release_contract")]
    pub release_contract: String,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u32,
    /// symbol -> decimals
    #[serde(default)]
    pub assets: HashMap<String, u32>,
}

fn default_release_contract() -> String {
    "TokenPool".to_string()
}

fn default_required_confirmations() -> u32 {
    1
}

/// Endpoints serving one chain family
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    pub family: ChainFamily,
    pub endpoints: Vec<String>,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

impl ProviderConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Custody provider settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CustodyConfig {
    pub service_name: String,
    pub base_url: String,
    pub api_key: String,
    /// Hex encoded Ed25519 public key used to verify callbacks
    pub public_key: String,
    /// Reject callbacks whose timestamp is further than this from now (0 disables)
    pub max_clock_skew_secs: i64,
    pub coins: Vec<CoinMapping>,
    /// Static deposit address routes loaded into the in-memory route table
    pub deposit_routes: Vec<DepositRoute>,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            service_name: "Cobo".to_string(),
            base_url: "http://127.0.0.1:9000".to_string(),
            api_key: String::new(),
            public_key: String::new(),
            max_clock_skew_secs: 0,
            coins: Vec::new(),
            deposit_routes: Vec::new(),
        }
    }
}

/// Custody coin code -> network/symbol
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CoinMapping {
    pub coin: String,
    pub network: String,
    pub chain_id: String,
    pub symbol: String,
    /// Smallest deposit accepted, in whole units
    #[serde(default)]
    pub min_amount: Option<Decimal>,
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        Self::from_file(&config_path)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config yaml: {}", e))?;
        Ok(config)
    }

    pub fn chain(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

/*
[INPUT]:  YAML configuration file
[OUTPUT]: Validated engine configuration with documented defaults
[POS]:    Configuration layer - immutable per-run snapshot
[UPDATE]: When adding configuration options or changing defaults
*/

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::order_manager::OrderTiming;
use crate::safety::SafetyLimits;
use crate::strategy::StrategyParams;

/// Top-level configuration for the maker-farm agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FarmConfig {
    #[serde(default = "defaults::symbols")]
    pub symbols: Vec<String>,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub quoting: QuotingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

/// Account credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// Session token. When empty, the session handshake runs at startup.
    #[serde(default)]
    pub jwt_token: String,
    /// Ed25519 request-signing key, base64 encoded (32- or 64-byte form).
    pub signing_key: String,
    /// Account address used by the session handshake.
    #[serde(default)]
    pub wallet_address: String,
}

/// Quote geometry and sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotingConfig {
    #[serde(default = "defaults::order_size_usd")]
    pub order_size_usd: Decimal,
    /// Explicit ladder offsets; wins over `target_distance_bps` when present.
    #[serde(default)]
    pub order_distances_bps: Option<Vec<Decimal>>,
    /// Single-offset fallback used when no explicit list is configured.
    #[serde(default)]
    pub target_distance_bps: Option<Decimal>,
    #[serde(default = "defaults::min_distance_bps")]
    pub min_distance_bps: Decimal,
    #[serde(default = "defaults::max_distance_bps")]
    pub max_distance_bps: Decimal,
    #[serde(default = "defaults::drift_threshold_bps")]
    pub drift_threshold_bps: Decimal,
}

impl QuotingConfig {
    /// Resolve the ladder offsets.
    pub fn offsets(&self) -> Vec<Decimal> {
        if let Some(list) = &self.order_distances_bps {
            return list.clone();
        }
        if let Some(target) = self.target_distance_bps {
            return vec![target];
        }
        defaults::order_distances()
    }
}

impl Default for QuotingConfig {
    fn default() -> Self {
        Self {
            order_size_usd: defaults::order_size_usd(),
            order_distances_bps: None,
            target_distance_bps: None,
            min_distance_bps: defaults::min_distance_bps(),
            max_distance_bps: defaults::max_distance_bps(),
            drift_threshold_bps: defaults::drift_threshold_bps(),
        }
    }
}

/// Control-loop timing, all in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "defaults::order_lock_seconds")]
    pub order_lock_seconds: f64,
    #[serde(default = "defaults::rebalance_cooldown_seconds")]
    pub rebalance_cooldown_seconds: f64,
    #[serde(default = "defaults::check_interval_seconds")]
    pub check_interval_seconds: f64,
    #[serde(default = "defaults::sync_interval_seconds")]
    pub sync_interval_seconds: f64,
    #[serde(default = "defaults::order_grace_period_seconds")]
    pub order_grace_period_seconds: f64,
    #[serde(default = "defaults::order_404_timeout_seconds")]
    pub order_404_timeout_seconds: f64,
    #[serde(default = "defaults::rest_fallback_interval_seconds")]
    pub rest_fallback_interval_seconds: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            order_lock_seconds: defaults::order_lock_seconds(),
            rebalance_cooldown_seconds: defaults::rebalance_cooldown_seconds(),
            check_interval_seconds: defaults::check_interval_seconds(),
            sync_interval_seconds: defaults::sync_interval_seconds(),
            order_grace_period_seconds: defaults::order_grace_period_seconds(),
            order_404_timeout_seconds: defaults::order_404_timeout_seconds(),
            rest_fallback_interval_seconds: defaults::rest_fallback_interval_seconds(),
        }
    }
}

/// Safety-gate thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    #[serde(default = "defaults::max_position_usd")]
    pub max_position_usd: Decimal,
    #[serde(default)]
    pub pre_kill: PreKillConfig,
    #[serde(default)]
    pub hard_kill: HardKillConfig,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_position_usd: defaults::max_position_usd(),
            pre_kill: PreKillConfig::default(),
            hard_kill: HardKillConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreKillConfig {
    #[serde(default = "defaults::pre_kill_volatility_bps")]
    pub volatility_threshold_bps: Decimal,
    #[serde(default = "defaults::pre_kill_divergence_bps")]
    pub mark_mid_divergence_bps: Decimal,
    #[serde(default = "defaults::pause_duration_seconds")]
    pub pause_duration_seconds: f64,
}

impl Default for PreKillConfig {
    fn default() -> Self {
        Self {
            volatility_threshold_bps: defaults::pre_kill_volatility_bps(),
            mark_mid_divergence_bps: defaults::pre_kill_divergence_bps(),
            pause_duration_seconds: defaults::pause_duration_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardKillConfig {
    #[serde(default = "defaults::hard_kill_volatility_bps")]
    pub max_volatility_bps: Decimal,
    #[serde(default = "defaults::stale_threshold_seconds")]
    pub stale_threshold_seconds: f64,
}

impl Default for HardKillConfig {
    fn default() -> Self {
        Self {
            max_volatility_bps: defaults::hard_kill_volatility_bps(),
            stale_threshold_seconds: defaults::stale_threshold_seconds(),
        }
    }
}

/// Venue endpoints; tests override these with mock servers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointsConfig {
    #[serde(default = "defaults::auth_url")]
    pub auth_url: String,
    #[serde(default = "defaults::trading_url")]
    pub trading_url: String,
    #[serde(default = "defaults::ws_url")]
    pub ws_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            auth_url: defaults::auth_url(),
            trading_url: defaults::trading_url(),
            ws_url: defaults::ws_url(),
        }
    }
}

impl FarmConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {path}"))?;
        let config: Self = serde_yaml::from_str(&content).context("parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("symbols must not be empty");
        }
        if self.quoting.order_size_usd <= Decimal::ZERO {
            bail!("quoting.order_size_usd must be positive");
        }

        let offsets = self.quoting.offsets();
        if offsets.is_empty() {
            bail!("at least one quote offset is required");
        }
        if self.quoting.min_distance_bps > self.quoting.max_distance_bps {
            bail!("quoting.min_distance_bps exceeds quoting.max_distance_bps");
        }
        for offset in &offsets {
            if *offset < self.quoting.min_distance_bps || *offset > self.quoting.max_distance_bps {
                bail!(
                    "quote offset {offset} bps outside [{}, {}]",
                    self.quoting.min_distance_bps,
                    self.quoting.max_distance_bps
                );
            }
        }

        for (name, value) in [
            ("order_lock_seconds", self.timing.order_lock_seconds),
            ("check_interval_seconds", self.timing.check_interval_seconds),
            ("sync_interval_seconds", self.timing.sync_interval_seconds),
        ] {
            if value <= 0.0 {
                bail!("timing.{name} must be positive");
            }
        }

        if self.credentials.signing_key.trim().is_empty() {
            bail!("credentials.signing_key is required");
        }
        if self.credentials.jwt_token.trim().is_empty()
            && self.credentials.wallet_address.trim().is_empty()
        {
            bail!("credentials needs either jwt_token or wallet_address for the session handshake");
        }

        Ok(())
    }

    /// Resolve the per-symbol strategy parameters.
    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            order_size_usd: self.quoting.order_size_usd,
            offsets_bps: self.quoting.offsets(),
            max_distance_bps: self.quoting.max_distance_bps,
            drift_threshold_bps: self.quoting.drift_threshold_bps,
            check_interval: Duration::from_secs_f64(self.timing.check_interval_seconds),
            sync_interval: Duration::from_secs_f64(self.timing.sync_interval_seconds),
            rebalance_cooldown: Duration::from_secs_f64(self.timing.rebalance_cooldown_seconds),
            rest_fallback_interval: Duration::from_secs_f64(
                self.timing.rest_fallback_interval_seconds,
            ),
            order_timing: OrderTiming {
                lock: Duration::from_secs_f64(self.timing.order_lock_seconds),
                grace: Duration::from_secs_f64(self.timing.order_grace_period_seconds),
                not_found_timeout: Duration::from_secs_f64(self.timing.order_404_timeout_seconds),
            },
            safety: SafetyLimits {
                max_position_usd: self.safety.max_position_usd,
                pre_kill_volatility_bps: self.safety.pre_kill.volatility_threshold_bps,
                pre_kill_divergence_bps: self.safety.pre_kill.mark_mid_divergence_bps,
                pause_duration: Duration::from_secs_f64(
                    self.safety.pre_kill.pause_duration_seconds,
                ),
                hard_kill_volatility_bps: self.safety.hard_kill.max_volatility_bps,
                stale_threshold: Duration::from_secs_f64(
                    self.safety.hard_kill.stale_threshold_seconds,
                ),
            },
        }
    }
}

mod defaults {
    use rust_decimal::Decimal;

    pub fn symbols() -> Vec<String> {
        vec!["BTC-USD".to_string()]
    }

    pub fn order_size_usd() -> Decimal {
        Decimal::from(5)
    }

    pub fn order_distances() -> Vec<Decimal> {
        vec![Decimal::from(6), Decimal::from(8)]
    }

    pub fn min_distance_bps() -> Decimal {
        Decimal::from(5)
    }

    pub fn max_distance_bps() -> Decimal {
        Decimal::from(10)
    }

    pub fn drift_threshold_bps() -> Decimal {
        Decimal::from(15)
    }

    pub fn order_lock_seconds() -> f64 {
        0.7
    }

    pub fn rebalance_cooldown_seconds() -> f64 {
        3.0
    }

    pub fn check_interval_seconds() -> f64 {
        1.0
    }

    pub fn sync_interval_seconds() -> f64 {
        2.0
    }

    pub fn order_grace_period_seconds() -> f64 {
        3.0
    }

    pub fn order_404_timeout_seconds() -> f64 {
        10.0
    }

    pub fn rest_fallback_interval_seconds() -> f64 {
        5.0
    }

    pub fn max_position_usd() -> Decimal {
        Decimal::from(50)
    }

    pub fn pre_kill_volatility_bps() -> Decimal {
        Decimal::from(15)
    }

    pub fn pre_kill_divergence_bps() -> Decimal {
        Decimal::from(3)
    }

    pub fn pause_duration_seconds() -> f64 {
        5.0
    }

    pub fn hard_kill_volatility_bps() -> Decimal {
        Decimal::from(30)
    }

    pub fn stale_threshold_seconds() -> f64 {
        30.0
    }

    pub fn auth_url() -> String {
        "https://api.perpdex.example".to_string()
    }

    pub fn trading_url() -> String {
        "https://perps.perpdex.example".to_string()
    }

    pub fn ws_url() -> String {
        "wss://perps.perpdex.example/ws-stream/v1".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn minimal_yaml() -> &'static str {
        r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
"#
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let config: FarmConfig = serde_yaml::from_str(minimal_yaml()).unwrap();

        assert_eq!(config.symbols, vec!["BTC-USD".to_string()]);
        assert_eq!(config.quoting.order_size_usd, Decimal::from(5));
        assert_eq!(
            config.quoting.offsets(),
            vec![Decimal::from(6), Decimal::from(8)]
        );
        assert_eq!(config.timing.order_lock_seconds, 0.7);
        assert_eq!(config.timing.sync_interval_seconds, 2.0);
        assert_eq!(config.timing.order_404_timeout_seconds, 10.0);
        assert_eq!(config.safety.max_position_usd, Decimal::from(50));
        assert_eq!(
            config.safety.pre_kill.mark_mid_divergence_bps,
            Decimal::from(3)
        );
        assert_eq!(config.safety.hard_kill.max_volatility_bps, Decimal::from(30));

        config.validate().expect("defaults validate");
    }

    #[test]
    fn explicit_distance_list_wins_over_target() {
        let yaml = r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
quoting:
  order_distances_bps: ["6", "8"]
  target_distance_bps: "9"
"#;
        let config: FarmConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.quoting.offsets(),
            vec![Decimal::from(6), Decimal::from(8)]
        );
    }

    #[test]
    fn target_distance_is_the_fallback_ladder() {
        let yaml = r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
quoting:
  target_distance_bps: "8"
"#;
        let config: FarmConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.quoting.offsets(), vec![Decimal::from(8)]);
    }

    #[test]
    fn offsets_outside_the_distance_bounds_are_rejected() {
        let yaml = r#"
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
quoting:
  order_distances_bps: ["6", "12"]
"#;
        let config: FarmConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().expect_err("12 bps > max 10 bps");
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn empty_symbols_are_rejected() {
        let yaml = r#"
symbols: []
credentials:
  jwt_token: "jwt"
  signing_key: "a2V5"
"#;
        let config: FarmConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let yaml = r#"
credentials:
  signing_key: "a2V5"
"#;
        let config: FarmConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn strategy_params_convert_seconds_to_durations() {
        let config: FarmConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        let params = config.strategy_params();

        assert_eq!(params.order_timing.lock, Duration::from_millis(700));
        assert_eq!(params.order_timing.grace, Duration::from_secs(3));
        assert_eq!(params.order_timing.not_found_timeout, Duration::from_secs(10));
        assert_eq!(params.sync_interval, Duration::from_secs(2));
        assert_eq!(params.safety.pause_duration, Duration::from_secs(5));
        assert_eq!(
            params.drift_threshold_bps,
            Decimal::from_str("15").unwrap()
        );
    }
}

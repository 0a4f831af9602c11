use std::time::Duration;

/// Immutable source of the risk and strategy defaults.
///
/// Built once at startup and passed into the services that need it; there is
/// no process-wide mutable configuration holder. Balance-derived values
/// (`StrategyConfig`) are rebuilt from this struct on every refresh.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Stop-loss distance applied when a signal carries none, in percent.
    pub default_stop_loss_percent: f64,
    /// Fraction of the available balance risked per deal, in percent.
    pub risk_per_trade_percent: f64,
    /// Candidate leverage values, tried in order when sizing a deal.
    pub leverage_ladder: Vec<u32>,
    /// Validation warns when SL/TP sit further than this from entry, in percent.
    pub warning_distance_percent: f64,
    /// Take-profit count mapped to its percentage distribution.
    pub tp_distributions: Vec<(usize, Vec<u32>)>,
    /// PnL percentage level mapped to the position percentage to exit there.
    pub pnl_exit_levels: Vec<(f64, u32)>,
    /// Settlement coin used when sweeping open orders across symbols.
    pub settle_coin: String,
    /// Outbound requests allowed per rolling window.
    pub rate_limit_max_requests: u32,
    /// Length of the rolling request window.
    pub rate_limit_window: Duration,
    /// Forced pause once the window ceiling is hit.
    pub rate_limit_cooldown: Duration,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            default_stop_loss_percent: 3.0,
            risk_per_trade_percent: 2.0,
            leverage_ladder: vec![20, 10, 5],
            warning_distance_percent: 20.0,
            tp_distributions: vec![
                (1, vec![100]),
                (2, vec![60, 40]),
                (3, vec![50, 25, 25]),
                (4, vec![40, 30, 20, 10]),
            ],
            pnl_exit_levels: vec![(10.0, 25), (20.0, 25), (30.0, 50)],
            settle_coin: "USDT".to_string(),
            rate_limit_max_requests: 50,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(30),
        }
    }
}

impl TradingConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> TradingConfig {
        dotenvy::dotenv().ok();
        let mut config = TradingConfig::default();

        if let Ok(sl) = std::env::var("DEFAULT_STOP_LOSS_PERCENT") {
            match sl.parse::<f64>() {
                Ok(value) if value > 0.0 && value < 100.0 => {
                    config.default_stop_loss_percent = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid DEFAULT_STOP_LOSS_PERCENT value: {} (must be between 0 and 100), using default: {}",
                        value,
                        config.default_stop_loss_percent
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse DEFAULT_STOP_LOSS_PERCENT '{}': {}, using default: {}",
                        sl,
                        e,
                        config.default_stop_loss_percent
                    );
                }
            }
        }

        if let Ok(risk) = std::env::var("RISK_PER_TRADE_PERCENT") {
            match risk.parse::<f64>() {
                Ok(value) if value > 0.0 && value <= 100.0 => {
                    config.risk_per_trade_percent = value;
                }
                _ => {
                    tracing::warn!(
                        "Invalid RISK_PER_TRADE_PERCENT '{}', using default: {}",
                        risk,
                        config.risk_per_trade_percent
                    );
                }
            }
        }

        if let Ok(ladder) = std::env::var("LEVERAGE_LADDER") {
            let parsed: Vec<u32> = ladder
                .split(',')
                .filter_map(|part| part.trim().parse::<u32>().ok())
                .filter(|lv| *lv > 0)
                .collect();
            if parsed.is_empty() {
                tracing::warn!(
                    "Invalid LEVERAGE_LADDER '{}', using default: {:?}",
                    ladder,
                    config.leverage_ladder
                );
            } else {
                config.leverage_ladder = parsed;
            }
        }

        if let Ok(distance) = std::env::var("WARNING_DISTANCE_PERCENT") {
            if let Ok(value) = distance.parse::<f64>() {
                if value > 0.0 {
                    config.warning_distance_percent = value;
                }
            }
        }

        if let Ok(coin) = std::env::var("SETTLE_COIN") {
            if !coin.trim().is_empty() {
                config.settle_coin = coin.trim().to_uppercase();
            }
        }

        if let Ok(max) = std::env::var("RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(value) = max.parse::<u32>() {
                if value > 0 {
                    config.rate_limit_max_requests = value;
                }
            }
        }

        if let Ok(window) = std::env::var("RATE_LIMIT_WINDOW_SECONDS") {
            if let Ok(value) = window.parse::<u64>() {
                if value > 0 {
                    config.rate_limit_window = Duration::from_secs(value);
                }
            }
        }

        if let Ok(cooldown) = std::env::var("RATE_LIMIT_COOLDOWN_SECONDS") {
            if let Ok(value) = cooldown.parse::<u64>() {
                if value > 0 {
                    config.rate_limit_cooldown = Duration::from_secs(value);
                }
            }
        }

        config
    }

    /// Percentage distribution configured for a given take-profit count.
    pub fn distribution_for(&self, tp_count: usize) -> Option<&Vec<u32>> {
        self.tp_distributions
            .iter()
            .find(|(count, _)| *count == tp_count)
            .map(|(_, distribution)| distribution)
    }
}

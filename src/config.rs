use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::api::alpaca::{AlpacaConfig, ALPACA_DATA_URL, ALPACA_PAPER_TRADING_URL};
use crate::error::ConfigError;
use crate::execution::{ExecutionConfig, OrderStatePolicy};
use crate::models::TimeInForce;
use crate::strategy::crossover::CrossoverConfig;

/// Trading parameters for a single symbol
#[derive(Debug, Clone, Deserialize)]
pub struct TradingSettings {
    pub symbol: String,
    pub quantity: u32,
    pub short_window: usize,
    pub long_window: usize,
    pub history_bars: usize,
    pub poll_interval_secs: u64,
    pub time_in_force: TimeInForce,
    pub order_state_policy: OrderStatePolicy,
}

/// Bind address for `crossbot serve`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub trading: TradingSettings,
    pub alpaca: AlpacaConfig,
    pub server: ServerSettings,
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("trading.symbol", "AAPL")?
        .set_default("trading.quantity", 1_i64)?
        .set_default("trading.short_window", 50_i64)?
        .set_default("trading.long_window", 200_i64)?
        .set_default("trading.history_bars", 250_i64)?
        .set_default("trading.poll_interval_secs", 60_i64)?
        .set_default("trading.time_in_force", "day")?
        .set_default("trading.order_state_policy", "confirmed_only")?
        .set_default("alpaca.api_key_id", "")?
        .set_default("alpaca.api_secret_key", "")?
        .set_default("alpaca.trading_url", ALPACA_PAPER_TRADING_URL)?
        .set_default("alpaca.data_url", ALPACA_DATA_URL)?
        .set_default("alpaca.feed", "iex")?
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8000_i64)?)
}

/// Load settings from layered sources
///
/// 1. Built-in defaults.
/// 2. `crossbot.toml` in the working directory, or `path` when given.
/// 3. `CROSSBOT__*` environment variables (e.g. `CROSSBOT__TRADING__SYMBOL=MSFT`).
/// 4. Alpaca's own `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY` for credentials.
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path),
        None => File::with_name("crossbot").required(false),
    };

    let settings = with_defaults()?
        .add_source(file)
        .add_source(
            Environment::with_prefix("CROSSBOT")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("alpaca.api_key_id", std::env::var("APCA_API_KEY_ID").ok())?
        .set_override_option(
            "alpaca.api_secret_key",
            std::env::var("APCA_API_SECRET_KEY").ok(),
        )?
        .build()?;

    Ok(settings.try_deserialize()?)
}

impl Settings {
    /// Reject settings the bot cannot start with
    pub fn validate(&self, require_credentials: bool) -> Result<(), ConfigError> {
        let trading = &self.trading;

        if trading.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        self.crossover_config().validate()?;
        if trading.quantity == 0 {
            return Err(ConfigError::InvalidQuantity);
        }
        if trading.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        let required = trading.long_window.saturating_add(1);
        if trading.history_bars < required {
            return Err(ConfigError::InvalidHistory {
                bars: trading.history_bars,
                required,
            });
        }

        if require_credentials {
            if self.alpaca.api_key_id.is_empty() {
                return Err(ConfigError::MissingCredentials("APCA_API_KEY_ID"));
            }
            if self.alpaca.api_secret_key.is_empty() {
                return Err(ConfigError::MissingCredentials("APCA_API_SECRET_KEY"));
            }
        }

        Ok(())
    }

    pub fn crossover_config(&self) -> CrossoverConfig {
        CrossoverConfig {
            short_window: self.trading.short_window,
            long_window: self.trading.long_window,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            symbol: self.trading.symbol.trim().to_uppercase(),
            quantity: self.trading.quantity,
            history_bars: self.trading.history_bars,
            poll_interval: Duration::from_secs(self.trading.poll_interval_secs),
            time_in_force: self.trading.time_in_force,
            order_state_policy: self.trading.order_state_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn settings_from(toml: &str) -> Settings {
        with_defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from("");

        assert_eq!(settings.trading.symbol, "AAPL");
        assert_eq!(settings.trading.short_window, 50);
        assert_eq!(settings.trading.long_window, 200);
        assert_eq!(settings.trading.poll_interval_secs, 60);
        assert_eq!(
            settings.trading.order_state_policy,
            OrderStatePolicy::ConfirmedOnly
        );
        assert_eq!(settings.alpaca.trading_url, ALPACA_PAPER_TRADING_URL);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8000);

        assert!(settings.validate(false).is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let settings = settings_from(
            r#"
            [trading]
            symbol = "msft"
            quantity = 5
            time_in_force = "gtc"
            order_state_policy = "after_attempt"

            [alpaca]
            api_key_id = "AKTEST"
            api_secret_key = "secret"

            [server]
            port = 9000
            "#,
        );

        assert_eq!(settings.server.port, 9000);

        assert!(settings.validate(true).is_ok());

        let execution = settings.execution_config();
        assert_eq!(execution.symbol, "MSFT");
        assert_eq!(execution.quantity, 5);
        assert_eq!(execution.time_in_force, TimeInForce::Gtc);
        assert_eq!(execution.order_state_policy, OrderStatePolicy::AfterAttempt);
        assert_eq!(execution.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_credentials() {
        let settings = settings_from("");

        assert!(matches!(
            settings.validate(true),
            Err(ConfigError::MissingCredentials("APCA_API_KEY_ID"))
        ));
    }

    #[test]
    fn test_invalid_windows() {
        let settings = settings_from(
            r#"
            [trading]
            short_window = 200
            long_window = 50
            "#,
        );

        assert!(matches!(
            settings.validate(false),
            Err(ConfigError::InvalidWindows { .. })
        ));
    }

    #[test]
    fn test_invalid_quantity_and_interval() {
        let zero_qty = settings_from("[trading]\nquantity = 0\n");
        assert!(matches!(
            zero_qty.validate(false),
            Err(ConfigError::InvalidQuantity)
        ));

        let zero_interval = settings_from("[trading]\npoll_interval_secs = 0\n");
        assert!(matches!(
            zero_interval.validate(false),
            Err(ConfigError::InvalidInterval)
        ));
    }

    #[test]
    fn test_history_must_cover_long_window() {
        let settings = settings_from("[trading]\nhistory_bars = 200\n");

        assert!(matches!(
            settings.validate(false),
            Err(ConfigError::InvalidHistory {
                bars: 200,
                required: 201
            })
        ));
    }

    #[test]
    fn test_empty_symbol() {
        let settings = settings_from("[trading]\nsymbol = \"  \"\n");
        assert!(matches!(
            settings.validate(false),
            Err(ConfigError::EmptySymbol)
        ));
    }
}

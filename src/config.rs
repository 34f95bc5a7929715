// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use dotenv::dotenv;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

/// Arbitrage watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Detection cycle configuration
    pub detector: DetectorConfig,

    /// Automated execution configuration
    pub execution: ExecutionConfig,

    /// Venue endpoints and credentials
    pub venues: VenuesConfig,

    /// Ranking persistence configuration
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Detection cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Seconds between detection cycles
    pub cycle_secs: u64,

    /// Minimum percent gap before a row is forwarded to execution
    pub min_execution_percent: Decimal,

    /// Minimum notional value (TMN) for a row to be emitted at all
    pub min_notional_tmn: Decimal,

    /// Number of rows exposed in the latest snapshot
    pub snapshot_len: usize,

    /// Cross rate used until the first USDTTMN quote arrives
    pub default_usdt_rate: Decimal,

    /// Optional path to the precomputed common-symbol mapping file
    pub symbol_map_file: Option<String>,
}

/// Automated execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Whether qualifying rows are executed automatically
    pub auto_execute: bool,

    /// Realized loss percent at which a position is force-closed
    pub max_loss_percent: Decimal,

    /// Minimum notional value (TMN) the SELL leg must clear
    pub min_sell_notional_tmn: Decimal,

    /// How many times to poll for a BUY fill before cancelling
    pub fill_poll_attempts: u32,

    /// Milliseconds between BUY fill polls
    pub fill_poll_interval_ms: u64,

    /// Seconds between loss-protection polls
    pub loss_poll_secs: u64,
}

/// Venue endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuesConfig {
    pub binance_ws_url: String,
    pub binance_api_url: String,
    pub wallex_ws_url: String,
    pub wallex_api_url: String,
    pub wallex_api_key: String,
    pub nobitex_api_url: String,
    pub nobitex_api_token: String,
}

/// Ranking persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path
    pub sqlite_path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let detector_config = DetectorConfig {
            cycle_secs: env::var("DETECTION_PERIOD_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            min_execution_percent: env::var("MIN_EXECUTION_PERCENT")
                .unwrap_or_else(|_| "2.2".to_string())
                .parse()
                .unwrap_or(Decimal::new(22, 1)),
            min_notional_tmn: env::var("MIN_NOTIONAL_TMN")
                .unwrap_or_else(|_| "500000".to_string())
                .parse()
                .unwrap_or(Decimal::new(500_000, 0)),
            snapshot_len: env::var("SNAPSHOT_LEN")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            default_usdt_rate: env::var("DEFAULT_USDT_RATE")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap_or(Decimal::new(60_000, 0)),
            symbol_map_file: env::var("SYMBOL_MAP_FILE").ok(),
        };

        let execution_config = ExecutionConfig {
            auto_execute: env::var("AUTO_EXECUTE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            max_loss_percent: env::var("MAX_LOSS_PERCENT")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(Decimal::ONE),
            min_sell_notional_tmn: env::var("MIN_SELL_NOTIONAL_TMN")
                .unwrap_or_else(|_| "100000".to_string())
                .parse()
                .unwrap_or(Decimal::new(100_000, 0)),
            fill_poll_attempts: env::var("FILL_POLL_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            fill_poll_interval_ms: env::var("FILL_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            loss_poll_secs: env::var("LOSS_POLL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        };

        let venues_config = VenuesConfig {
            binance_ws_url: env::var("BINANCE_WS_URL")
                .unwrap_or_else(|_| "wss://stream.binance.com:9443".to_string()),
            binance_api_url: env::var("BINANCE_API_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            wallex_ws_url: env::var("WALLEX_WS_URL")
                .unwrap_or_else(|_| "wss://api.wallex.ir/ws".to_string()),
            wallex_api_url: env::var("WALLEX_API_URL")
                .unwrap_or_else(|_| "https://api.wallex.ir".to_string()),
            wallex_api_key: env::var("WALLEX_API_KEY").unwrap_or_default(),
            nobitex_api_url: env::var("NOBITEX_API_URL")
                .unwrap_or_else(|_| "https://api.nobitex.ir".to_string()),
            nobitex_api_token: env::var("NOBITEX_API_TOKEN").unwrap_or_default(),
        };

        let persistence_config = PersistenceConfig {
            sqlite_path: env::var("SQLITE_PATH").unwrap_or_else(|_| "arb_watch.db".to_string()),
        };

        let logging_config = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            to_file: env::var("LOG_TO_FILE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config {
            detector: detector_config,
            execution: execution_config,
            venues: venues_config,
            persistence: persistence_config,
            logging: logging_config,
        })
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path).map_err(|e| {
                    AppError::Config(format!("Failed to create log file: {}", e))
                })?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.init();

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detector: DetectorConfig {
                cycle_secs: 10,
                min_execution_percent: Decimal::new(22, 1),
                min_notional_tmn: Decimal::new(500_000, 0),
                snapshot_len: 10,
                default_usdt_rate: Decimal::new(60_000, 0),
                symbol_map_file: None,
            },
            execution: ExecutionConfig {
                auto_execute: false,
                max_loss_percent: Decimal::ONE,
                min_sell_notional_tmn: Decimal::new(100_000, 0),
                fill_poll_attempts: 5,
                fill_poll_interval_ms: 1000,
                loss_poll_secs: 5,
            },
            venues: VenuesConfig {
                binance_ws_url: "wss://stream.binance.com:9443".to_string(),
                binance_api_url: "https://api.binance.com".to_string(),
                wallex_ws_url: "wss://api.wallex.ir/ws".to_string(),
                wallex_api_url: "https://api.wallex.ir".to_string(),
                wallex_api_key: String::new(),
                nobitex_api_url: "https://api.nobitex.ir".to_string(),
                nobitex_api_token: String::new(),
            },
            persistence: PersistenceConfig {
                sqlite_path: "arb_watch.db".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}

use thiserror::Error;

/// Failure to obtain a usable price history from a market-data provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("market data API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("no price data returned for {symbol}")]
    Empty { symbol: String },
}

/// Failure to get an order accepted by an order sink
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("order rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Invalid or incomplete settings; fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error("invalid moving average windows: short={short}, long={long} (need 0 < short < long)")]
    InvalidWindows { short: usize, long: usize },

    #[error("order quantity must be greater than zero")]
    InvalidQuantity,

    #[error("poll interval must be greater than zero seconds")]
    InvalidInterval,

    #[error("history of {bars} bars is too short, need at least {required}")]
    InvalidHistory { bars: usize, required: usize },

    #[error("symbol must not be empty")]
    EmptySymbol,
}

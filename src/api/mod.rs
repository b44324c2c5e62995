pub mod alpaca;

pub use alpaca::{AlpacaClient, AlpacaConfig};

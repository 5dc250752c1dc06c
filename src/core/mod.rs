pub mod config;
pub mod errors;
pub mod instruments;
pub mod kernel;
pub mod orderbook;
pub mod router;
pub mod sink;
pub mod subscription;
pub mod traits;
pub mod types;

pub mod core;
pub mod exchanges;

pub use core::{errors::EngineError, types::*};
pub use exchanges::deribit::DeribitStream;

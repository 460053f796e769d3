mod config;
mod constants;
mod protocol;
mod stats;

pub use config::*;
pub use constants::*;
pub use protocol::*;
pub use stats::*;

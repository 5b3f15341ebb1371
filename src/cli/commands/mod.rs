//! CLI command implementations

pub mod cache;
pub mod config;
pub mod replay;

pub use cache::execute as cache;
pub use config::execute as config;
pub use replay::execute as replay;

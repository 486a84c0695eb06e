mod config;
pub mod timeout;

pub use config::Config;
pub use timeout::with_timeout;
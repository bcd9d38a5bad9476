mod config;
mod error;
mod health;
mod transport;

pub use config::HttpTransportConfig;
pub use health::HttpHealthChecker;
pub use transport::HttpTransport;

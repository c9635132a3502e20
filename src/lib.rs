//! link-embed: delayed, rate-limited link previews
//!
//! This crate turns bare URLs seen in a stream of chat messages into preview
//! cards. A preview is only produced if nothing richer shows up during a short
//! grace period, the global request budget allows it, and the page was not
//! already summarised recently.

pub mod cache;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod limiter;
pub mod pipeline;
pub mod preview;
pub mod url;

use thiserror::Error;

/// Main error type for link-embed operations
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Scheduler is shut down")]
    SchedulerClosed,

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for link-embed operations
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use cache::MetadataCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use fetch::{FetchError, FetchResult, FetchedPage, Fetcher};
pub use limiter::RateLimiter;
pub use pipeline::{DelayScheduler, InboundMessage, MessageId, Orchestrator, WorkerPool};
pub use preview::{HtmlMetadataParser, MetadataParser, Preview, PreviewCard};

//! Configuration module for link-embed
//!
//! This module handles loading, parsing, validating and writing TOML
//! configuration files. Every tunable of the pipeline lives here and is handed
//! to each component's constructor; nothing reads configuration globally.
//!
//! # Example
//!
//! ```no_run
//! use link_embed::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Cache holds up to {} previews", config.cache.max_size);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CacheConfig, Config, EmbedConfig, HttpConfig, ImageProxyConfig, RateLimitConfig,
    WorkerConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, write_default_config};
pub use validation::validate;

use crate::config::types::{
    CacheConfig, Config, EmbedConfig, HttpConfig, ImageProxyConfig, RateLimitConfig,
    WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_embed_config(&config.embed)?;
    validate_cache_config(&config.cache)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_http_config(&config.http)?;
    validate_worker_config(&config.workers)?;
    validate_image_proxy_config(&config.image_proxy)?;
    Ok(())
}

/// One day
const MAX_DELAY_SECONDS: u64 = 24 * 60 * 60;

/// One year
const MAX_TTL_MINUTES: u64 = 365 * 24 * 60;

fn validate_embed_config(config: &EmbedConfig) -> Result<(), ConfigError> {
    if config.delay_seconds > MAX_DELAY_SECONDS {
        return Err(ConfigError::Validation(format!(
            "embed delay-seconds must be <= {}, got {}",
            MAX_DELAY_SECONDS, config.delay_seconds
        )));
    }
    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.max_size < 1 {
        return Err(ConfigError::Validation(format!(
            "cache max-size must be >= 1, got {}",
            config.max_size
        )));
    }

    if config.ttl_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "cache ttl-minutes must be >= 1, got {}",
            config.ttl_minutes
        )));
    }

    if config.ttl_minutes > MAX_TTL_MINUTES {
        return Err(ConfigError::Validation(format!(
            "cache ttl-minutes must be <= {}, got {}",
            MAX_TTL_MINUTES, config.ttl_minutes
        )));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    let rate = config.requests_per_second;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "requests-per-second must be a positive number, got {}",
            rate
        )));
    }
    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "http timeout-ms must be >= 1".to_string(),
        ));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "http max-redirects must be <= 20, got {}",
            config.max_redirects
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "http user-agent cannot be empty".to_string(),
        ));
    }

    if config.max_html_bytes < 1 {
        return Err(ConfigError::Validation(
            "http max-html-bytes must be >= 1".to_string(),
        ));
    }

    let growth = config.range_growth_factor;
    if !growth.is_finite() || growth < 1.0 {
        return Err(ConfigError::Validation(format!(
            "http range-growth-factor must be >= 1.0, got {}",
            growth
        )));
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "workers max-concurrency must be <= 256, got {}",
            config.max_concurrency
        )));
    }

    if config.io_drivers < 1 || config.io_drivers > 16 {
        return Err(ConfigError::Validation(format!(
            "workers io-drivers must be between 1 and 16, got {}",
            config.io_drivers
        )));
    }

    Ok(())
}

fn validate_image_proxy_config(config: &ImageProxyConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    let base = Url::parse(&config.base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid image-proxy base: {}", e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "image-proxy base '{}' must use http or https",
            config.base
        )));
    }

    Ok(())
}

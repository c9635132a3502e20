use serde::{Deserialize, Serialize};

/// Main configuration structure for link-embed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embed: EmbedConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default, rename = "image-proxy")]
    pub image_proxy: ImageProxyConfig,
}

/// When previews are produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Grace period before a preview is generated for a message (seconds)
    #[serde(rename = "delay-seconds", default = "default_delay_seconds")]
    pub delay_seconds: u64,
}

/// Metadata cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached previews
    #[serde(rename = "max-size", default = "default_cache_max_size")]
    pub max_size: usize,

    /// How long a cached preview stays valid (minutes)
    #[serde(rename = "ttl-minutes", default = "default_cache_ttl_minutes")]
    pub ttl_minutes: u64,
}

/// Global request budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second; also the burst size
    #[serde(rename = "requests-per-second", default = "default_requests_per_second")]
    pub requests_per_second: f64,
}

/// HTTP fetcher behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of redirect hops followed
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: u32,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Absolute cap on bytes read from one document
    #[serde(rename = "max-html-bytes", default = "default_max_html_bytes")]
    pub max_html_bytes: usize,

    /// Size of the first range request (0 means start at the cap)
    #[serde(rename = "initial-range-bytes", default = "default_initial_range_bytes")]
    pub initial_range_bytes: usize,

    /// Multiplier applied to the byte budget after an inconclusive parse
    #[serde(rename = "range-growth-factor", default = "default_range_growth_factor")]
    pub range_growth_factor: f64,

    /// Refuse to connect to private, loopback and link-local addresses
    #[serde(rename = "block-private-addresses", default = "default_true")]
    pub block_private_addresses: bool,
}

/// Execution resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker tasks for continuation work (0 = available parallelism)
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// I/O driver tasks multiplexing HTTP transfers
    #[serde(rename = "io-drivers", default = "default_io_drivers")]
    pub io_drivers: usize,
}

/// Optional rewriting of preview images through an image proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Proxy endpoint; the original image URL is passed as `?url=`
    #[serde(default = "default_proxy_base")]
    pub base: String,

    /// Host substrings whose images are proxied
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Extra query string appended after the `url` parameter
    #[serde(default)]
    pub query: String,
}

fn default_delay_seconds() -> u64 {
    5
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_ttl_minutes() -> u64 {
    10
}

fn default_requests_per_second() -> f64 {
    2.0
}

fn default_timeout_ms() -> u64 {
    4000
}

fn default_max_redirects() -> u32 {
    5
}

fn default_user_agent() -> String {
    "LinkEmbedBot/1.0".to_string()
}

fn default_max_html_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_initial_range_bytes() -> usize {
    512 * 1024
}

fn default_range_growth_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    4
}

fn default_io_drivers() -> usize {
    1
}

fn default_proxy_base() -> String {
    "https://images.weserv.nl".to_string()
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_minutes: default_cache_ttl_minutes(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            max_html_bytes: default_max_html_bytes(),
            initial_range_bytes: default_initial_range_bytes(),
            range_growth_factor: default_range_growth_factor(),
            block_private_addresses: default_true(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            io_drivers: default_io_drivers(),
        }
    }
}

impl Default for ImageProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base: default_proxy_base(),
            hosts: Vec::new(),
            query: String::new(),
        }
    }
}

impl WorkerConfig {
    /// Number of worker tasks to start, resolving 0 to the host's parallelism
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency > 0 {
            return self.max_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

use serde::Deserialize;

/// Root application configuration. Loaded from an optional `thunder.toml`
/// and environment variables with the prefix `THUNDER__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tenants: TenantConfig,
    #[serde(default)]
    pub cohorts: CohortConfig,
    #[serde(default)]
    pub store: StoreBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Expiry applied to persisted user snapshots. Zero keeps them forever.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Tenants allowed to call the SDK API. Empty allows every tenant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl TenantConfig {
    pub fn is_allowed(&self, tenant_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|t| t == tenant_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortConfig {
    #[serde(default = "default_cohorts")]
    pub default_cohorts: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

// Default functions
fn default_node_id() -> String {
    "thunder-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_key_prefix() -> String {
    "thunder".to_string()
}
fn default_ttl_secs() -> u64 {
    0
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_refresh_interval_ms() -> u64 {
    60_000
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_cohorts() -> Vec<String> {
    vec!["all".to_string()]
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            default_cohorts: default_cohorts(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            tenants: TenantConfig::default(),
            cohorts: CohortConfig::default(),
            store: StoreBackend::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("thunder").required(false))
            .add_source(
                config::Environment::with_prefix("THUNDER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("redis.urls")
                    .with_list_parse_key("tenants.allowed")
                    .with_list_parse_key("cohorts.default_cohorts"),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Release repository as `owner/name`
    pub release_repo: String,

    /// Release API base URL (default: GitHub)
    pub release_api_url: String,

    /// Optional bearer token; unauthenticated calls are heavily rate-limited
    pub release_api_token: Option<String>,

    /// Prefix put back in front of normalized tags when fetching (default: "v")
    pub release_tag_prefix: String,

    /// Release cache TTL in seconds (default: 3600)
    pub release_cache_ttl_secs: u64,

    /// Timeout applied to every outbound HTTP call, in seconds (default: 30)
    pub http_timeout_secs: u64,

    /// Fixed authoritative version; takes precedence over `version_file`
    pub current_version: Option<String>,

    /// File holding the authoritative version (plain text or JSON with a `version` key)
    pub version_file: String,

    /// Root directory for file-backed storage
    pub data_dir: String,

    /// When set, Redis replaces the file store for durable JSON state
    pub redis_url: Option<String>,

    /// Preference write debounce window in milliseconds (default: 5000)
    pub preferences_debounce_ms: u64,

    /// Maximum in-flight deliveries during fan-out (default: 4)
    pub delivery_concurrency: usize,

    /// Per-field character budget of the delivery transport (default: 1024)
    pub field_value_limit: usize,

    /// Number of releases announced on a first run (default: 5)
    pub first_run_release_cap: usize,

    /// Scheduled check interval in seconds; 0 disables the schedule (default: 3600)
    pub check_interval_secs: u64,

    /// Discord bot token
    pub discord_bot_token: Option<String>,

    /// Discord REST API base URL
    pub discord_api_url: String,

    /// Port for the HTTP trigger surface (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let release_repo = std::env::var("RELEASE_REPO")
            .map_err(|_| anyhow::anyhow!("RELEASE_REPO environment variable is required"))?;
        if release_repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
            anyhow::bail!("RELEASE_REPO must look like owner/name, got '{}'", release_repo);
        }

        Ok(Self {
            release_repo,
            release_api_url: std::env::var("RELEASE_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            release_api_token: std::env::var("RELEASE_API_TOKEN").ok(),
            release_tag_prefix: std::env::var("RELEASE_TAG_PREFIX")
                .unwrap_or_else(|_| "v".to_string()),
            release_cache_ttl_secs: std::env::var("RELEASE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RELEASE_CACHE_TTL_SECS must be a valid u64"))?,
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a valid u64"))?,
            current_version: std::env::var("CURRENT_VERSION").ok(),
            version_file: std::env::var("VERSION_FILE").unwrap_or_else(|_| "VERSION".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            redis_url: std::env::var("REDIS_URL").ok(),
            preferences_debounce_ms: std::env::var("PREFERENCES_DEBOUNCE_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PREFERENCES_DEBOUNCE_MS must be a valid u64"))?,
            delivery_concurrency: std::env::var("DELIVERY_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_CONCURRENCY must be a valid usize"))?,
            field_value_limit: std::env::var("FIELD_VALUE_LIMIT")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("FIELD_VALUE_LIMIT must be a valid usize"))?,
            first_run_release_cap: std::env::var("FIRST_RUN_RELEASE_CAP")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("FIRST_RUN_RELEASE_CAP must be a valid usize"))?,
            check_interval_secs: std::env::var("CHECK_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CHECK_INTERVAL_SECS must be a valid u64"))?,
            discord_bot_token: std::env::var("DISCORD_BOT_TOKEN").ok(),
            discord_api_url: std::env::var("DISCORD_API_URL")
                .unwrap_or_else(|_| "https://discord.com/api/v10".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
        })
    }
}

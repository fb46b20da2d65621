use serde::Deserialize;

pub const ENV_PREFIX: &str = "XPANEL_CP";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
    pub tokens: TokenConfig,
    pub agent: AgentConfig,
    pub limits: LimitsConfig,
    pub metrics: MetricsConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Admin authentication against an external identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// JWKS document URL of the identity provider. Empty disables
    /// admin JWT auth entirely (useful for agent-only deployments).
    pub jwks_url: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub pepper: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Max commands handed out per heartbeat response.
    pub command_batch: u32,
    /// Seconds a delivered command may wait for its ack before the
    /// sweeper expires it.
    pub delivery_timeout_secs: u64,
    /// Seconds a pending command may sit undelivered before expiry.
    pub command_pending_ttl_secs: u64,
    /// Heartbeat silence after which a node is flipped to inactive.
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
    /// Per-token heartbeat rate limit; 0 disables it.
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_field_len: usize,
    pub agent_body_bytes: u64,
    pub admin_body_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub migrations_dry_run_on_start: bool,
}

impl AgentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command_batch == 0 {
            anyhow::bail!("agent.command_batch must be > 0");
        }
        if self.delivery_timeout_secs == 0 {
            anyhow::bail!("agent.delivery_timeout_secs must be > 0");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("agent.sweep_interval_secs must be > 0");
        }
        if self.stale_after_secs == 0 {
            anyhow::bail!("agent.stale_after_secs must be > 0");
        }
        Ok(())
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.jwks_url.is_empty() && !self.jwks_url.starts_with("http") {
            anyhow::bail!("identity.jwks_url must be an http(s) URL");
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("identity.cache_ttl_secs must be > 0");
        }
        Ok(())
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric secrets are not coerced.
        .try_parsing(false);

    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(env)
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8000)?
        .set_default("database.url", "sqlite://data/xpanel.db")?
        .set_default("identity.jwks_url", "")?
        .set_default("identity.issuer", Option::<String>::None)?
        .set_default("identity.audience", Option::<String>::None)?
        .set_default("identity.cache_ttl_secs", 300u64)?
        .set_default("tokens.pepper", "")?
        .set_default("agent.command_batch", 16u32)?
        .set_default("agent.delivery_timeout_secs", 30u64)?
        .set_default("agent.command_pending_ttl_secs", 15 * 60u64)?
        .set_default("agent.stale_after_secs", 120u64)?
        .set_default("agent.sweep_interval_secs", 15u64)?
        .set_default("agent.rate_limit_per_minute", 0u32)?
        .set_default("limits.max_field_len", 255)?
        .set_default("limits.agent_body_bytes", 256 * 1024u64)?
        .set_default("limits.admin_body_bytes", 512 * 1024u64)?
        .set_default("metrics.host", "127.0.0.1")?
        .set_default("metrics.port", 9100)?
        .set_default("features.migrations_dry_run_on_start", false)?;

    // Bare env names kept for deployment compatibility; the prefixed
    // form wins when both are set.
    for (bare, key) in [
        ("PORT", "server.port"),
        ("IDENTITY_PROVIDER_JWKS_URL", "identity.jwks_url"),
        ("TOKEN_HASH_PEPPER", "tokens.pepper"),
        ("AGENT_COMMAND_BATCH", "agent.command_batch"),
        ("COMMAND_DELIVERY_TIMEOUT", "agent.delivery_timeout_secs"),
    ] {
        if let Ok(value) = std::env::var(bare) {
            // The delivery timeout is written both as "30" and "30s".
            let value = if bare == "COMMAND_DELIVERY_TIMEOUT" {
                value.trim_end_matches('s').to_string()
            } else {
                value
            };
            builder = builder.set_default(key, value)?;
        }
    }
    if let Ok(data_dir) = std::env::var("DATA_DIR") {
        let trimmed = data_dir.trim_end_matches('/');
        builder = builder.set_default("database.url", format!("sqlite://{trimmed}/xpanel.db"))?;
    }

    let cfg = builder.build()?;
    let app: AppConfig = cfg.try_deserialize()?;
    app.agent.validate()?;
    app.identity.validate()?;
    Ok(app)
}

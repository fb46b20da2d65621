use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::IdentityConfig;
use crate::Result;

/// Claims the control plane cares about from an admin JWT.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct CachedKeys {
    fetched_at: Instant,
    keys: HashMap<String, DecodingKey>,
}

/// Cached JWKS fetcher for the configured identity provider.
///
/// Keys are refreshed at most once per TTL. A token carrying an
/// unknown `kid` forces one refresh before failing, so provider key
/// rotation does not lock admins out for a full TTL.
#[derive(Clone)]
pub struct JwksCache {
    config: IdentityConfig,
    client: reqwest::Client,
    cache: Arc<RwLock<Option<CachedKeys>>>,
    refresh: Arc<Mutex<()>>,
}

impl JwksCache {
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(None)),
            refresh: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.jwks_url.is_empty()
    }

    /// Validate a bearer JWT and return its claims.
    pub async fn verify(&self, token: &str) -> Result<Option<AdminClaims>> {
        if !self.is_configured() {
            return Ok(None);
        }

        let header = match decode_header(token) {
            Ok(header) => header,
            Err(err) => {
                debug!(%err, "rejecting token with malformed header");
                return Ok(None);
            }
        };
        let kid = header.kid.unwrap_or_default();

        let key = match self.key_for(&kid, false).await? {
            Some(key) => key,
            // Unknown kid: the provider may have rotated keys.
            None => match self.key_for(&kid, true).await? {
                Some(key) => key,
                None => return Ok(None),
            },
        };

        let mut validation = Validation::new(header.alg);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        match decode::<AdminClaims>(token, &key, &validation) {
            Ok(data) => Ok(Some(data.claims)),
            Err(err) => {
                debug!(%err, "token failed validation");
                Ok(None)
            }
        }
    }

    async fn key_for(&self, kid: &str, force_refresh: bool) -> Result<Option<DecodingKey>> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if !force_refresh {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.keys.get(kid).cloned());
                }
            }
        }

        // Refreshes are serialized; waiters answer from the cache a peer
        // just wrote instead of issuing their own upstream request.
        let wait_started = Instant::now();
        let _refresh = self.refresh.lock().await;
        {
            let guard = self.cache.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at >= wait_started {
                    return Ok(cached.keys.get(kid).cloned());
                }
                if !force_refresh && cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.keys.get(kid).cloned());
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let found = keys.get(kid).cloned();
        let mut guard = self.cache.write().await;
        *guard = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys,
        });
        Ok(found)
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, DecodingKey>> {
        let document: JwksDocument = self
            .client
            .get(&self.config.jwks_url)
            .send()
            .await
            .context("fetching JWKS document")?
            .error_for_status()
            .context("JWKS endpoint returned an error")?
            .json()
            .await
            .context("parsing JWKS document")?;

        Ok(build_key_map(document))
    }
}

fn build_key_map(document: JwksDocument) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();
    for jwk in document.keys {
        if jwk.kty != "RSA" {
            continue;
        }
        if let Some(alg) = &jwk.alg {
            if alg.parse::<Algorithm>().is_err() {
                continue;
            }
        }
        let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
            continue;
        };
        let Ok(key) = DecodingKey::from_rsa_components(n, e) else {
            continue;
        };
        keys.insert(jwk.kid.unwrap_or_default(), key);
    }
    keys
}

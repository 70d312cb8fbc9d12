//! JWKS caching.
//!
//! Keys are cached for one hour. A token whose `kid` is not in the cached set
//! triggers a refetch before verification fails, so rotated keys are picked
//! up. Such forced refetches happen at most once per minute; unknown `kid`s
//! seen in between fail without contacting the provider.

use std::time::{Duration, Instant};

use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet},
};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::OidcError;

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache for a single provider.
pub struct JwksCache {
    inner: RwLock<Option<CachedJwks>>,
    http: reqwest::Client,
    jwks_uri: String,
    /// How long to cache a fetched JWKS (default 1 hour).
    ttl: Duration,
    /// When an unknown `kid` last forced a refetch
    last_forced: Mutex<Option<Instant>>,
    /// Minimum spacing between forced refetches (default 1 minute).
    min_refresh_interval: Duration,
}

impl JwksCache {
    /// Create with default 1-hour TTL.
    #[must_use]
    pub fn new(http: reqwest::Client, jwks_uri: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(None),
            http,
            jwks_uri: jwks_uri.into(),
            ttl: Duration::from_secs(3600),
            last_forced: Mutex::new(None),
            min_refresh_interval: Duration::from_secs(60),
        }
    }

    /// Return the cached key set, or fetch it if stale.
    ///
    /// If `force_refresh` is `true`, the cache is bypassed regardless of TTL.
    pub async fn get_or_fetch(&self, force_refresh: bool) -> Result<JwkSet, OidcError> {
        if !force_refresh {
            let cached = self
                .inner
                .read()
                .as_ref()
                .filter(|c| c.fetched_at.elapsed() < self.ttl)
                .map(|c| c.keys.clone());
            if let Some(keys) = cached {
                return Ok(keys);
            }
        }

        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        *self.inner.write() = Some(CachedJwks {
            keys: jwks.clone(),
            fetched_at: Instant::now(),
        });

        Ok(jwks)
    }

    /// Candidate verification keys for a token header.
    ///
    /// With a `kid`, only the matching key is returned; an unknown `kid`
    /// refreshes the set unless another refresh was forced less than a minute
    /// ago. Without a `kid`, every key usable with `alg` is a candidate.
    pub async fn decoding_keys(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<Vec<DecodingKey>, OidcError> {
        let jwks = self.get_or_fetch(false).await?;
        let Some(kid) = kid else {
            return Ok(keys_for_alg(&jwks, alg));
        };

        if let Some(key) = find_key(&jwks, kid) {
            return Ok(vec![key?]);
        }

        if !self.claim_forced_refresh() {
            debug!(kid = %kid, "Key not found in cached JWKS, refresh throttled");
            return Err(OidcError::UnknownKeyId(kid.to_string()));
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.get_or_fetch(true).await?;
        match find_key(&jwks, kid) {
            Some(key) => Ok(vec![key?]),
            None => Err(OidcError::UnknownKeyId(kid.to_string())),
        }
    }

    /// Reserve the next forced refetch. Returns `false` while the previous
    /// one is within `min_refresh_interval`.
    fn claim_forced_refresh(&self) -> bool {
        let mut last = self.last_forced.lock();
        if last.is_some_and(|at| at.elapsed() < self.min_refresh_interval) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
fn find_key(jwks: &JwkSet, kid: &str) -> Option<Result<DecodingKey, OidcError>> {
    jwks.find(kid)
        .map(|jwk| DecodingKey::from_jwk(jwk).map_err(OidcError::from))
}

/// Every key whose type fits the algorithm family.
fn keys_for_alg(jwks: &JwkSet, alg: Algorithm) -> Vec<DecodingKey> {
    jwks.keys
        .iter()
        .filter(|jwk| key_fits(jwk, alg))
        .filter_map(|jwk| DecodingKey::from_jwk(jwk).ok())
        .collect()
}

fn key_fits(jwk: &Jwk, alg: Algorithm) -> bool {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(
            alg,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ),
        AlgorithmParameters::EllipticCurve(_) => {
            matches!(alg, Algorithm::ES256 | Algorithm::ES384)
        }
        AlgorithmParameters::OctetKey(_) => {
            matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
        }
        AlgorithmParameters::OctetKeyPair(_) => matches!(alg, Algorithm::EdDSA),
    }
}

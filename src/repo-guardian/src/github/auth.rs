//! GitHub App authentication.
//!
//! The App's long-lived RSA key signs short-lived JWTs; those JWTs are
//! exchanged for installation access tokens, which are cached per
//! installation until shortly before expiry.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::error::GitHubError;

/// How long an App JWT is valid. GitHub allows up to ten minutes.
const JWT_TTL_SECS: u64 = 540;

/// Backdate `iat` to absorb clock drift between this host and GitHub.
const JWT_DRIFT_SECS: u64 = 60;

/// Refresh installation tokens this long before they expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// App-level credentials: the numeric App id and its RSA signing key.
pub(super) struct AppAuth {
    app_id: u64,
    key: EncodingKey,
}

#[derive(Debug, Serialize)]
struct Claims {
    iat: u64,
    exp: u64,
    iss: String,
}

impl AppAuth {
    /// Loads the App private key from a PEM file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid RSA
    /// private key.
    pub(super) fn from_pem_file(app_id: u64, path: &Path) -> Result<Self, GitHubError> {
        let pem = std::fs::read(path).map_err(|e| GitHubError::PrivateKey {
            path: path.display().to_string(),
            source: e,
        })?;

        let key = EncodingKey::from_rsa_pem(&pem)?;

        Ok(Self { app_id, key })
    }

    /// Mints a short-lived RS256 JWT identifying the App.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub(super) fn jwt(&self) -> Result<String, GitHubError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = Claims {
            iat: now.saturating_sub(JWT_DRIFT_SECS),
            exp: now + JWT_TTL_SECS,
            iss: self.app_id.to_string(),
        };

        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }
}

/// Response body of `POST /app/installations/{id}/access_tokens`.
#[derive(Debug, Deserialize)]
pub(super) struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A cached installation token with its expiry.
#[derive(Debug, Clone)]
pub(super) struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Whether the token is still usable at `now`, with a safety margin so
    /// in-flight requests do not race the expiry.
    pub(super) fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS) > now
    }
}

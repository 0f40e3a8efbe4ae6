//! Access Tokens
//!
//! OAuth access tokens for the Google APIs. An explicit token from the
//! environment wins; otherwise the gcloud CLI is asked for one. Tokens are
//! never logged.

use parking_lot::Mutex;
use tokio::process::Command;
use tracing::debug;

use crate::error::PlatformError;
use crate::runtime::adapter::PlatformResult;

/// Environment variables checked for a ready-made token, in order
pub const TOKEN_ENV_VARS: &[&str] = &["MAPLINK_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

#[derive(Clone, PartialEq, Eq)]
enum Origin {
    Fixed(String),
    Gcloud(String),
}

/// Source of bearer tokens, caching the first token it obtains
pub struct TokenSource {
    origin: Origin,
    cached: Mutex<Option<String>>,
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = match &self.origin {
            Origin::Fixed(_) => "fixed".to_string(),
            Origin::Gcloud(program) => format!("gcloud ({program})"),
        };
        f.debug_struct("TokenSource").field("origin", &origin).finish()
    }
}

impl TokenSource {
    /// Token from [`TOKEN_ENV_VARS`], falling back to `gcloud`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        TOKEN_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|token| token.trim().to_string())
            .find(|token| !token.is_empty())
            .map(Self::fixed)
            .unwrap_or_else(|| Self::gcloud("gcloud"))
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            origin: Origin::Fixed(token.into()),
            cached: Mutex::new(None),
        }
    }

    /// Tokens printed by `<program> auth print-access-token`
    pub fn gcloud(program: impl Into<String>) -> Self {
        Self {
            origin: Origin::Gcloud(program.into()),
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> PlatformResult<String> {
        let program = match &self.origin {
            Origin::Fixed(token) => return Ok(token.clone()),
            Origin::Gcloud(program) => program.clone(),
        };
        let cached = self.cached.lock().clone();
        if let Some(token) = cached {
            return Ok(token);
        }

        debug!(program = %program, "Requesting access token");
        let output = Command::new(&program)
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| PlatformError::Auth(format!("could not run `{program}`: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::Auth(format!(
                "`{program} auth print-access-token` failed: {}",
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(PlatformError::Auth(format!("`{program}` printed no token")));
        }
        *self.cached.lock() = Some(token.clone());
        Ok(token)
    }

    /// Drop a cached token so the next call fetches a fresh one
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}

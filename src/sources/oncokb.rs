use std::borrow::Cow;
use std::path::Path;

use tracing::debug;

use crate::error::TrialMatchError;
use crate::matching::conditions::OncoTreeTrialIndex;
use crate::sources::CachePolicy;

pub(crate) const ONCOKB_BASE: &str = "https://www.oncokb.org/api/v1";
pub(crate) const ONCOKB_BASE_ENV: &str = "TRIALMATCH_ONCOKB_BASE";
const ONCOKB_API: &str = "oncokb";
const ONCOKB_TOKEN_ENV: &str = "ONCOKB_TOKEN";

pub struct OncoKBClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    token: Option<String>,
}

impl OncoKBClient {
    pub fn new() -> Result<Self, TrialMatchError> {
        let token = std::env::var(ONCOKB_TOKEN_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(ONCOKB_BASE, ONCOKB_BASE_ENV),
            token,
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String, token: Option<String>) -> Self {
        Self {
            client: crate::sources::test_client(),
            base: Cow::Owned(base),
            token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Fetches the OncoTree code → trials map. The token is sent when set;
    /// authenticated responses bypass the shared cache.
    pub async fn fetch_trial_index(&self) -> Result<OncoTreeTrialIndex, TrialMatchError> {
        let url = self.endpoint("trials");
        let mut req = self.client.get(&url);
        let authenticated = match self.token.as_deref() {
            Some(token) => {
                req = req.header("Authorization", format!("Bearer {token}"));
                true
            }
            None => false,
        };

        let cache = if authenticated {
            CachePolicy::NoStore
        } else {
            CachePolicy::Shared
        };
        let body: serde_json::Value = crate::sources::send_json(ONCOKB_API, req, cache).await?;
        if !body.is_object() {
            return Err(TrialMatchError::Api {
                api: ONCOKB_API.to_string(),
                message: "Expected an object keyed by OncoTree code".into(),
            });
        }

        let index = OncoTreeTrialIndex::from_json(&body);
        debug!(codes = index.code_count(), "OncoKB trial index loaded");
        Ok(index)
    }
}

/// Loads a dictionary file in the same shape the OncoKB endpoint returns.
pub async fn load_dictionary_file(path: &Path) -> Result<OncoTreeTrialIndex, TrialMatchError> {
    let bytes = tokio::fs::read(path).await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    if !body.is_object() {
        return Err(TrialMatchError::InvalidArgument(format!(
            "Condition dictionary {} must be a JSON object keyed by OncoTree code",
            path.display()
        )));
    }
    Ok(OncoTreeTrialIndex::from_json(&body))
}

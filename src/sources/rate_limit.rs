//! Fixed minimum spacing between requests to each upstream.
//!
//! Registry windows are requested one after another, so each page waits for
//! the previous slot. URLs outside the three known bases are not throttled.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::sources::{cbioportal, clinicaltrials, env_base, oncokb};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Upstream {
    Registry,
    OncoKb,
    CBioPortal,
}

impl Upstream {
    fn min_interval(self) -> Duration {
        match self {
            Self::Registry | Self::CBioPortal => Duration::from_millis(100),
            Self::OncoKb => Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RateLimiter {
    bases: Vec<(Upstream, String)>,
    next_slot: Mutex<HashMap<Upstream, Instant>>,
}

impl RateLimiter {
    fn from_env() -> Self {
        Self::new(vec![
            (
                Upstream::Registry,
                env_base(clinicaltrials::CTGOV_BASE, clinicaltrials::CTGOV_BASE_ENV).into_owned(),
            ),
            (
                Upstream::OncoKb,
                env_base(oncokb::ONCOKB_BASE, oncokb::ONCOKB_BASE_ENV).into_owned(),
            ),
            (
                Upstream::CBioPortal,
                env_base(cbioportal::CBIOPORTAL_BASE, cbioportal::CBIOPORTAL_BASE_ENV)
                    .into_owned(),
            ),
        ])
    }

    pub(crate) fn new(bases: Vec<(Upstream, String)>) -> Self {
        Self {
            bases,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    fn upstream_for(&self, url: &str) -> Option<Upstream> {
        self.bases
            .iter()
            .find(|(_, base)| url.starts_with(base.as_str()))
            .map(|(upstream, _)| *upstream)
    }

    /// Reserves the next send slot for `url` and sleeps until it opens.
    pub(crate) async fn wait_for(&self, url: &str) {
        let Some(upstream) = self.upstream_for(url) else {
            return;
        };
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(&upstream).copied().unwrap_or(now).max(now);
            slots.insert(upstream, slot + upstream.min_interval());
            slot
        };
        sleep_until(slot).await;
    }
}

static LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            limiter: LIMITER
                .get_or_init(|| Arc::new(RateLimiter::from_env()))
                .clone(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.limiter.wait_for(req.url().as_str()).await;
        next.run(req, extensions).await
    }
}

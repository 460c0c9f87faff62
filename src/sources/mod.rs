//! Source clients and shared HTTP utilities for the trial registry and its collaborators.

use std::borrow::Cow;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use http_cache_reqwest::{
    CACacheManager, Cache, CacheMode, CacheOptions, HttpCache, HttpCacheOptions,
};
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tracing::warn;

use crate::error::TrialMatchError;

pub(crate) mod cbioportal;
pub(crate) mod clinicaltrials;
pub(crate) mod oncokb;
pub(crate) mod rate_limit;

const EXCERPT_MAX_BYTES: usize = 2048;
const BODY_MAX_BYTES: usize = 8 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();

tokio::task_local! {
    static NO_CACHE: bool;
}

/// Runs `fut` with `--no-cache` in effect for every [`CachePolicy::Shared`] request.
pub(crate) async fn with_no_cache<R, F>(no_cache: bool, fut: F) -> R
where
    F: Future<Output = R>,
{
    NO_CACHE.scope(no_cache, fut).await
}

/// How a request may use the on-disk HTTP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CachePolicy {
    /// Reference data (cBioPortal, anonymous OncoKB). Disabled by `--no-cache`.
    Shared,
    /// Never written to disk: registry trial records and authenticated responses.
    NoStore,
}

impl CachePolicy {
    fn effective(self) -> Self {
        match self {
            Self::Shared if NO_CACHE.try_with(|v| *v).unwrap_or(false) => Self::NoStore,
            other => other,
        }
    }

    fn apply(self, req: RequestBuilder) -> RequestBuilder {
        match self.effective() {
            Self::NoStore => req.with_extension(CacheMode::NoStore),
            Self::Shared => req,
        }
    }
}

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    match std::env::var(env_var) {
        Ok(v) if !v.trim().is_empty() => Cow::Owned(v.trim().to_string()),
        _ => Cow::Borrowed(default),
    }
}

pub(crate) fn is_valid_gene_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Returns the process-wide HTTP client: disk cache, 3 transient retries with
/// exponential backoff, then per-upstream request spacing.
///
/// Responses without freshness headers stay usable for 24h (`max-stale`);
/// this only matters for [`CachePolicy::Shared`] requests.
pub(crate) fn shared_client() -> Result<ClientWithMiddleware, TrialMatchError> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let mut default_headers = HeaderMap::new();
    default_headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-stale=86400"));

    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("trialmatch-cli/", env!("CARGO_PKG_VERSION")))
        .default_headers(default_headers)
        .build()
        .map_err(TrialMatchError::HttpClientInit)?;

    let cache_path = crate::utils::trialmatch_cache_dir().join("http-cacache");
    std::fs::create_dir_all(&cache_path)?;

    let client = ClientBuilder::new(base_client)
        .with(disk_cache(cache_path))
        .with(RetryTransientMiddleware::new_with_policy(
            ExponentialBackoff::builder().build_with_max_retries(3),
        ))
        .with(rate_limit::RateLimitMiddleware::new())
        .build();

    let _ = HTTP_CLIENT.set(client);
    HTTP_CLIENT.get().cloned().ok_or_else(|| TrialMatchError::Api {
        api: "http-client".into(),
        message: "Shared HTTP client initialization failed".into(),
    })
}

fn disk_cache(path: std::path::PathBuf) -> Cache<CACacheManager> {
    Cache(HttpCache {
        mode: CacheMode::Default,
        manager: CACacheManager { path },
        options: HttpCacheOptions {
            cache_options: Some(CacheOptions {
                // Shared-cache semantics keep private responses off disk.
                shared: true,
                ..CacheOptions::default()
            }),
            ..HttpCacheOptions::default()
        },
    })
}

/// Bare middleware client for mock-server tests: no disk cache, no retries.
#[cfg(test)]
pub(crate) fn test_client() -> ClientWithMiddleware {
    ClientBuilder::new(reqwest::Client::new()).build()
}

/// Test client backed by a fresh on-disk cache under the temp dir.
#[cfg(test)]
pub(crate) fn cached_test_client(name: &str) -> ClientWithMiddleware {
    let dir = std::env::temp_dir().join(format!(
        "trialmatch-cache-test-{name}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    ClientBuilder::new(reqwest::Client::new())
        .with(disk_cache(dir))
        .build()
}

/// One-line, size-capped rendering of an error body.
fn body_excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= EXCERPT_MAX_BYTES {
        return flat;
    }
    let mut end = EXCERPT_MAX_BYTES;
    while !flat.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} …", &flat[..end])
}

/// Maintenance pages come back as HTML with a 200; reject them before decoding.
fn reject_html(
    api: &str,
    content_type: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), TrialMatchError> {
    let media_type = content_type
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match media_type.as_str() {
        "text/html" | "application/xhtml+xml" => Err(TrialMatchError::Api {
            api: api.to_string(),
            message: format!("Unexpected HTML response: {}", body_excerpt(body)),
        }),
        "" | "application/json" | "text/json" => Ok(()),
        other if other.ends_with("+json") => Ok(()),
        other => {
            warn!(source = api, content_type = other, "non-JSON content type; decoding anyway");
            Ok(())
        }
    }
}

async fn read_body(mut resp: reqwest::Response, api: &str) -> Result<Vec<u8>, TrialMatchError> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if body.len() + chunk.len() > BODY_MAX_BYTES {
            return Err(TrialMatchError::Api {
                api: api.to_string(),
                message: format!("Response body exceeded {BODY_MAX_BYTES} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Sends `req` under `cache` and decodes a JSON body, mapping non-2xx
/// statuses and malformed payloads into `TrialMatchError` with `api` as context.
pub(crate) async fn send_json<T: serde::de::DeserializeOwned>(
    api: &str,
    req: RequestBuilder,
    cache: CachePolicy,
) -> Result<T, TrialMatchError> {
    let resp = cache.apply(req).send().await?;
    let status = resp.status();
    let content_type = resp.headers().get(CONTENT_TYPE).cloned();
    let bytes = read_body(resp, api).await?;
    if !status.is_success() {
        return Err(TrialMatchError::Api {
            api: api.to_string(),
            message: format!("HTTP {status}: {}", body_excerpt(&bytes)),
        });
    }
    reject_html(api, content_type.as_ref(), &bytes)?;
    serde_json::from_slice(&bytes).map_err(|source| TrialMatchError::ApiJson {
        api: api.to_string(),
        source,
    })
}

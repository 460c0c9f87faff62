use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::error::TrialMatchError;
use crate::sources::cbioportal::{CBIOPORTAL_BASE, CBIOPORTAL_BASE_ENV};
use crate::sources::clinicaltrials::{CTGOV_BASE, CTGOV_BASE_ENV};
use crate::sources::env_base;
use crate::sources::oncokb::{ONCOKB_BASE, ONCOKB_BASE_ENV};

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Trial Matching Health Check\n\n");
        out.push_str("| API | Status | Latency |\n");
        out.push_str("|-----|--------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} checks healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

fn probe_url(default: &'static str, env_var: &str, path: &str) -> String {
    format!(
        "{}/{}",
        env_base(default, env_var).trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn check_one(client: reqwest::Client, api: &str, url: &str) -> HealthRow {
    let start = Instant::now();
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await;

    match resp {
        Ok(resp) => {
            let status = resp.status();
            let elapsed = start.elapsed().as_millis();
            if status.is_success() {
                HealthRow {
                    api: api.to_string(),
                    status: "ok".into(),
                    latency: format!("{elapsed}ms"),
                }
            } else {
                HealthRow {
                    api: api.to_string(),
                    status: "error".into(),
                    latency: format!("{elapsed}ms (HTTP {})", status.as_u16()),
                }
            }
        }
        Err(err) => {
            let reason = if err.is_timeout() {
                "timeout"
            } else if err.is_connect() {
                "connect"
            } else {
                "error"
            };
            HealthRow {
                api: api.to_string(),
                status: "error".into(),
                latency: reason.into(),
            }
        }
    }
}

fn health_http_client() -> Result<reqwest::Client, TrialMatchError> {
    static HEALTH_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    if let Some(client) = HEALTH_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .user_agent(concat!("trialmatch-cli/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(TrialMatchError::HttpClientInit)?;

    match HEALTH_HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HEALTH_HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| TrialMatchError::Api {
                api: "health".into(),
                message: "Health HTTP client initialization race".into(),
            }),
    }
}

async fn check_cache_dir() -> HealthRow {
    let start = Instant::now();
    let dir = crate::utils::trialmatch_cache_dir();
    let probe = dir.join(format!(".trialmatch-healthcheck-{}.tmp", std::process::id()));

    let result = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&probe, b"ok").await?;
        match tokio::fs::remove_file(&probe).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
    .await;

    match result {
        Ok(()) => HealthRow {
            api: format!("Cache dir ({})", dir.display()),
            status: "ok".into(),
            latency: format!("{}ms", start.elapsed().as_millis()),
        },
        Err(err) => HealthRow {
            api: format!("Cache dir ({})", dir.display()),
            status: "error".into(),
            latency: format!("{:?}", err.kind()),
        },
    }
}

/// Runs connectivity checks for the trial registry, OncoKB, cBioPortal and
/// the local cache directory.
///
/// # Errors
///
/// Returns an error when the health HTTP client cannot be created.
pub async fn check(apis_only: bool) -> Result<HealthReport, TrialMatchError> {
    let client = health_http_client()?;

    let ctgov_url = probe_url(
        CTGOV_BASE,
        CTGOV_BASE_ENV,
        "query/full_studies?expr=cancer&min_rnk=1&max_rnk=1&fmt=json",
    );
    let oncokb_url = probe_url(ONCOKB_BASE, ONCOKB_BASE_ENV, "info");
    let cbioportal_url = probe_url(CBIOPORTAL_BASE, CBIOPORTAL_BASE_ENV, "info");

    let (ctgov, oncokb, cbioportal) = tokio::join!(
        check_one(client.clone(), "ClinicalTrials.gov", &ctgov_url),
        check_one(client.clone(), "OncoKB", &oncokb_url),
        check_one(client.clone(), "cBioPortal", &cbioportal_url),
    );

    let mut rows = vec![ctgov, oncokb, cbioportal];
    if !apis_only {
        rows.push(check_cache_dir().await);
    }
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn check_one_reports_ok_and_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let ok = check_one(client.clone(), "OncoKB", &format!("{}/info", server.uri())).await;
        assert_eq!(ok.status, "ok");
        assert!(ok.latency.ends_with("ms"));

        let down = check_one(client, "cBioPortal", &format!("{}/down", server.uri())).await;
        assert_eq!(down.status, "error");
        assert!(down.latency.contains("HTTP 503"));
    }

    #[test]
    fn markdown_lists_rows_and_summary() {
        let report = HealthReport {
            healthy: 1,
            total: 2,
            rows: vec![
                HealthRow {
                    api: "ClinicalTrials.gov".into(),
                    status: "ok".into(),
                    latency: "12ms".into(),
                },
                HealthRow {
                    api: "OncoKB".into(),
                    status: "error".into(),
                    latency: "timeout".into(),
                },
            ],
        };
        let md = report.to_markdown();
        assert!(md.contains("| ClinicalTrials.gov | ok | 12ms |"));
        assert!(md.contains("Status: 1/2 checks healthy"));
        assert!(!report.all_healthy());
    }

    #[test]
    fn probe_url_joins_base_and_path() {
        let url = probe_url(
            "https://example.org/api/",
            "TRIALMATCH_TEST_UNSET_HEALTH_BASE",
            "/info",
        );
        assert_eq!(url, "https://example.org/api/info");
    }
}

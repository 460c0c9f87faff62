//! Exhaustive retrieval of every registry study matching one keyword.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::entities::criteria::RecruitingStatus;
use crate::entities::study::RegistryStudy;
use crate::error::TrialMatchError;

/// One registry request. Page bounds are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryQuery {
    pub keyword: String,
    pub auxiliary_keywords: Vec<String>,
    pub page_start: usize,
    pub page_end: usize,
    pub countries: Vec<String>,
    pub statuses: Vec<RecruitingStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryPage {
    pub total_found: usize,
    pub studies: Vec<RegistryStudy>,
}

/// Keyword search against an external trial registry.
#[async_trait]
pub trait TrialRegistry: Send + Sync {
    fn name(&self) -> &str {
        "registry"
    }

    async fn search(&self, query: &RegistryQuery) -> Result<RegistryPage, TrialMatchError>;
}

/// Country and status filters applied to every request of a run.
#[derive(Debug, Clone, Default)]
pub struct RegistryFilters {
    pub countries: Vec<String>,
    pub statuses: Vec<RecruitingStatus>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    pub page_size: usize,
    pub page_timeout: Duration,
}

async fn request_page(
    registry: &dyn TrialRegistry,
    query: &RegistryQuery,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RegistryPage, TrialMatchError> {
    debug!(
        keyword = %query.keyword,
        page_start = query.page_start,
        page_end = query.page_end,
        "registry page request"
    );
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TrialMatchError::Cancelled),
        res = tokio::time::timeout(timeout, registry.search(query)) => match res {
            Ok(page) => page,
            Err(_) => Err(TrialMatchError::Timeout {
                api: registry.name().to_string(),
                millis: timeout.as_millis(),
            }),
        },
    }
}

/// Returns every study matching `keyword`, paging sequentially in windows of
/// `options.page_size` after a size-1 probe that reports the total count.
///
/// # Errors
///
/// Any failed probe or page aborts the keyword with
/// [`TrialMatchError::RegistryUnavailable`]; cancellation yields
/// [`TrialMatchError::Cancelled`].
pub async fn fetch_all(
    registry: &dyn TrialRegistry,
    keyword: &str,
    auxiliary_keywords: &[String],
    filters: &RegistryFilters,
    options: PageOptions,
    cancel: &CancellationToken,
) -> Result<Vec<RegistryStudy>, TrialMatchError> {
    let page_size = options.page_size.max(1);
    let mut query = RegistryQuery {
        keyword: keyword.to_string(),
        auxiliary_keywords: auxiliary_keywords.to_vec(),
        page_start: 1,
        page_end: 1,
        countries: filters.countries.clone(),
        statuses: filters.statuses.clone(),
    };

    let probe = request_page(registry, &query, options.page_timeout, cancel)
        .await
        .map_err(|err| err.for_keyword(keyword))?;
    let total = probe.total_found;
    if total == 0 {
        debug!(keyword, "no studies found");
        return Ok(Vec::new());
    }

    let mut studies: Vec<RegistryStudy> = Vec::with_capacity(total.min(1_000));
    query.page_start = 1;
    query.page_end = page_size;
    loop {
        let page = request_page(registry, &query, options.page_timeout, cancel)
            .await
            .map_err(|err| err.for_keyword(keyword))?;
        studies.extend(page.studies);

        if query.page_end >= total {
            break;
        }
        query.page_start = query.page_end + 1;
        query.page_end += page_size;
    }

    studies.truncate(total);
    debug!(keyword, total, retrieved = studies.len(), "keyword retrieval complete");
    Ok(studies)
}

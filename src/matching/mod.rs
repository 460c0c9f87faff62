//! Clinical trial matching: keyword retrieval, aggregation, scoring and ranking.
//!
//! A run derives keywords from the active [`SearchCriteria`], pages through
//! the registry for each keyword, folds every hit into a per-run
//! [`TrialMatchIndex`], scores each trial and returns the entries sorted by
//! score. Nothing is shared between runs.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entities::criteria::SearchCriteria;
use crate::error::TrialMatchError;

pub(crate) mod conditions;
pub(crate) mod detail;
pub(crate) mod eligibility;
pub(crate) mod paginate;
pub(crate) mod score;
pub(crate) mod study_list;

use conditions::ConditionDictionary;
use paginate::{PageOptions, RegistryFilters, TrialRegistry};
use score::ScoringContext;
use study_list::{AggregatedTrialEntry, TrialMatchIndex};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 30;

const PAGE_TIMEOUT_ENV: &str = "TRIALMATCH_PAGE_TIMEOUT_SECS";
const KEYWORD_CONCURRENCY_ENV: &str = "TRIALMATCH_KEYWORD_CONCURRENCY";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub page_size: usize,
    pub page_timeout: Duration,
    /// Keywords retrieved at once. Aggregation stays single-writer either way.
    pub keyword_concurrency: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SECS),
            keyword_concurrency: 1,
        }
    }
}

fn env_positive(env_var: &str) -> Option<u64> {
    std::env::var(env_var)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

impl MatchConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_positive(PAGE_TIMEOUT_ENV) {
            config.page_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_positive(KEYWORD_CONCURRENCY_ENV) {
            config.keyword_concurrency = usize::try_from(n).unwrap_or(1);
        }
        config
    }

    fn page_options(&self) -> PageOptions {
        PageOptions {
            page_size: self.page_size,
            page_timeout: self.page_timeout,
        }
    }
}

/// A keyword whose retrieval aborted; other keywords still contribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordFailure {
    pub keyword: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub keywords: Vec<String>,
    /// Sorted by descending score; ties keep aggregation order.
    pub entries: Vec<AggregatedTrialEntry>,
    pub failures: Vec<KeywordFailure>,
}

/// Stable descending sort by score.
pub fn rank(entries: &mut [AggregatedTrialEntry]) {
    entries.sort_by(|a, b| b.score().cmp(&a.score()));
}

/// Runs one complete match for `criteria`.
///
/// # Errors
///
/// Returns [`TrialMatchError::Cancelled`] when `cancel` fires before the run
/// completes. Per-keyword registry failures do not fail the run; they are
/// reported in [`MatchOutcome::failures`].
pub async fn run_match(
    registry: &dyn TrialRegistry,
    dictionary: &dyn ConditionDictionary,
    criteria: &SearchCriteria,
    condition_codes: &[String],
    config: &MatchConfig,
    cancel: &CancellationToken,
) -> Result<MatchOutcome, TrialMatchError> {
    let keywords = criteria.keywords();
    if keywords.is_empty() {
        info!("no search keywords; nothing to match");
        return Ok(MatchOutcome::default());
    }

    let auxiliary = criteria.auxiliary_keywords();
    let filters = RegistryFilters {
        countries: criteria.countries.iter().cloned().collect(),
        statuses: criteria.recruiting_statuses.iter().copied().collect(),
    };
    let options = config.page_options();

    let mut index = TrialMatchIndex::new();
    let mut failures: Vec<KeywordFailure> = Vec::new();

    // `buffered` yields in keyword order, so this loop is the only writer and
    // aggregation order matches a sequential run. Keywords are streamed owned
    // so the run future stays `Send`.
    let mut retrievals = futures::stream::iter(keywords.iter().cloned())
        .map(|keyword: String| {
            let auxiliary = &auxiliary;
            let filters = &filters;
            async move {
                let res =
                    paginate::fetch_all(registry, &keyword, auxiliary, filters, options, cancel)
                        .await;
                (keyword, res)
            }
        })
        .buffered(config.keyword_concurrency.max(1));

    while let Some((keyword, res)) = retrievals.next().await {
        match res {
            Ok(studies) => {
                info!(keyword = %keyword, studies = studies.len(), "keyword retrieved");
                for study in studies {
                    index.add_hit(Arc::new(study), &keyword);
                }
            }
            Err(TrialMatchError::Cancelled) => return Err(TrialMatchError::Cancelled),
            Err(err) => {
                warn!(keyword = %keyword, error = %err, "keyword retrieval failed");
                failures.push(KeywordFailure {
                    keyword,
                    message: err.to_string(),
                });
            }
        }
    }
    drop(retrievals);

    if cancel.is_cancelled() {
        return Err(TrialMatchError::Cancelled);
    }

    if index.is_empty() {
        info!(keywords = keywords.len(), failed_keywords = failures.len(), "no trials found");
        return Ok(MatchOutcome {
            keywords,
            entries: Vec::new(),
            failures,
        });
    }
    debug!(trials = index.len(), "aggregation complete; scoring");

    let ctx = ScoringContext {
        condition_matches: dictionary.trial_ids_for_condition_codes(condition_codes),
        patient_sex: eligibility::normalize_sex(&criteria.patient_gender),
        patient_age: f64::from(criteria.patient_age),
    };
    for entry in index.entries_mut() {
        let breakdown = score::score(entry, &ctx);
        entry.apply_score(breakdown);
    }

    let mut entries = index.into_entries();
    rank(&mut entries);

    info!(
        keywords = keywords.len(),
        trials = entries.len(),
        condition_matches = ctx.condition_matches.len(),
        failed_keywords = failures.len(),
        "match run complete"
    );

    Ok(MatchOutcome {
        keywords,
        entries,
        failures,
    })
}

/// Tracks the in-flight run so that a new search supersedes the previous one.
#[derive(Debug, Default)]
pub struct MatchSession {
    current: std::sync::Mutex<Option<CancellationToken>>,
}

impl MatchSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any in-flight run and returns the token for a new one.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = current.replace(token.clone()) {
            if !previous.is_cancelled() {
                warn!("superseding in-flight match run");
            }
            previous.cancel();
        }
        token
    }

    /// Cancels the in-flight run, if any.
    pub fn cancel(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(token) = current.as_ref() {
            token.cancel();
        }
    }

    pub async fn run(
        &self,
        registry: &dyn TrialRegistry,
        dictionary: &dyn ConditionDictionary,
        criteria: Arc<SearchCriteria>,
        condition_codes: &[String],
        config: &MatchConfig,
    ) -> Result<MatchOutcome, TrialMatchError> {
        let token = self.begin();
        run_match(
            registry,
            dictionary,
            &criteria,
            condition_codes,
            config,
            &token,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashSet};

    use super::*;
    use crate::entities::criteria::RecruitingStatus;
    use crate::entities::study::{RegistryStudy, Sex, StudyEligibility};
    use crate::matching::conditions::OncoTreeTrialIndex;
    use crate::matching::detail::assemble;
    use crate::matching::paginate::tests::{FakeRegistry, numbered_studies};

    fn trial(id: &str, min: Option<&str>, max: Option<&str>, sex: Sex) -> RegistryStudy {
        RegistryStudy {
            id: id.to_string(),
            title: format!("Study {id}"),
            eligibility: StudyEligibility {
                min_age: min.map(str::to_string),
                max_age: max.map(str::to_string),
                sex,
                criteria_text: String::new(),
            },
            ..RegistryStudy::default()
        }
    }

    fn criteria(optional: &[&str], required: &[&str], age: u32, gender: &str) -> SearchCriteria {
        SearchCriteria {
            optional_gene_symbols: optional.iter().map(|s| s.to_string()).collect(),
            required_gene_symbols: required.iter().map(|s| s.to_string()).collect(),
            patient_age: age,
            patient_gender: gender.to_string(),
            ..SearchCriteria::default()
        }
    }

    #[tokio::test]
    async fn braf_scenario_ranks_condition_matched_trial_first() {
        let registry = FakeRegistry::default().with(
            "BRAF",
            vec![
                trial("NCT00000002", Some("70 Years"), None, Sex::Female),
                trial("NCT00000001", Some("18 Years"), Some("65 Years"), Sex::All),
            ],
        );
        let mut dictionary = OncoTreeTrialIndex::default();
        dictionary.insert("MEL", "NCT00000001");

        let outcome = run_match(
            &registry,
            &dictionary,
            &criteria(&[], &["BRAF"], 45, "Female"),
            &["MEL".to_string()],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.keywords, vec!["BRAF"]);
        let ranked = outcome
            .entries
            .iter()
            .map(|e| (e.id().to_string(), e.score()))
            .collect::<Vec<_>>();
        assert_eq!(
            ranked,
            vec![
                ("NCT00000001".to_string(), 11_101),
                ("NCT00000002".to_string(), 1_001),
            ]
        );
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn duplicate_hits_across_keywords_aggregate() {
        let shared = trial("NCT00000042", None, None, Sex::All);
        let registry = FakeRegistry::default()
            .with("BRAF", vec![shared.clone()])
            .with("NRAS", vec![shared, trial("NCT00000043", None, None, Sex::All)]);

        let outcome = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria(&["BRAF", "NRAS"], &[], 50, "Male"),
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.entries.len(), 2);
        let top = &outcome.entries[0];
        assert_eq!(top.id(), "NCT00000042");
        assert_eq!(top.hit_count(), 2);
        assert_eq!(top.matched_keywords(), ["BRAF", "NRAS"]);
        assert_eq!(top.score(), 1_000 + 100 + 2);

        let detailed = assemble(&outcome.entries);
        let ids = detailed
            .iter()
            .map(|d| d.nct_id.as_str())
            .collect::<HashSet<_>>();
        assert_eq!(ids.len(), detailed.len());
        for d in &detailed {
            assert_eq!(d.hit_count, d.keywords.split(',').count());
        }
    }

    #[tokio::test]
    async fn empty_keyword_set_yields_empty_outcome_without_requests() {
        let registry = FakeRegistry::default();
        let outcome = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria(&[], &[], 40, "All"),
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.entries.is_empty());
        assert!(outcome.keywords.is_empty());
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_keyword_keeps_results_from_others() {
        let registry = FakeRegistry::default()
            .with("EGFR", numbered_studies("NCT", 3))
            .failing("ALK");

        let outcome = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria(&["ALK", "EGFR"], &[], 60, "Female"),
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.entries.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].keyword, "ALK");
        assert!(outcome.failures[0].message.contains("'ALK'"));
    }

    #[tokio::test]
    async fn later_page_failure_drops_only_that_keyword() {
        let registry = FakeRegistry::default()
            .with("EGFR", numbered_studies("NCT", 150))
            .failing_from("EGFR", 101)
            .with("ALK", vec![trial("NCT77777", None, None, Sex::All)]);

        let outcome = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria(&["EGFR", "ALK"], &[], 60, "Female"),
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let ids = outcome.entries.iter().map(|e| e.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["NCT77777"]);
        assert_eq!(outcome.entries[0].matched_keywords(), ["ALK"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].keyword, "EGFR");
    }

    #[tokio::test]
    async fn ties_keep_aggregation_order() {
        let registry = FakeRegistry::default().with("KRAS", numbered_studies("NCT", 5));

        let outcome = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria(&["KRAS"], &[], 30, "Male"),
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let ids = outcome.entries.iter().map(|e| e.id()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["NCT00001", "NCT00002", "NCT00003", "NCT00004", "NCT00005"]
        );
    }

    #[tokio::test]
    async fn parallel_keywords_match_sequential_result() {
        let registry = FakeRegistry::default()
            .with("A", numbered_studies("NCT", 4))
            .with("B", numbered_studies("NCT", 2))
            .with("C", vec![trial("NCT99999", None, None, Sex::All)]);
        let criteria = criteria(&["A", "B", "C"], &[], 30, "Male");

        let sequential = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria,
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let parallel = run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria,
            &[],
            &MatchConfig {
                keyword_concurrency: 3,
                ..MatchConfig::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let summarize = |o: &MatchOutcome| {
            o.entries
                .iter()
                .map(|e| (e.id().to_string(), e.hit_count(), e.score()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summarize(&sequential), summarize(&parallel));
    }

    #[tokio::test]
    async fn filters_from_criteria_reach_registry() {
        #[derive(Default)]
        struct Capture {
            statuses: std::sync::Mutex<Vec<Vec<RecruitingStatus>>>,
        }

        #[async_trait::async_trait]
        impl TrialRegistry for Capture {
            async fn search(
                &self,
                query: &paginate::RegistryQuery,
            ) -> Result<paginate::RegistryPage, TrialMatchError> {
                self.statuses.lock().unwrap().push(query.statuses.clone());
                Ok(paginate::RegistryPage::default())
            }
        }

        let registry = Capture::default();
        let criteria = SearchCriteria {
            recruiting_statuses: BTreeSet::from([RecruitingStatus::Recruiting]),
            ..criteria(&["BRAF"], &[], 30, "Male")
        };
        run_match(
            &registry,
            &OncoTreeTrialIndex::default(),
            &criteria,
            &[],
            &MatchConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let seen = registry.statuses.lock().unwrap();
        assert_eq!(seen.as_slice(), [vec![RecruitingStatus::Recruiting]]);
    }

    #[tokio::test]
    async fn new_session_run_supersedes_previous_one() {
        let registry = Arc::new(FakeRegistry {
            delay: Some(Duration::from_millis(200)),
            ..FakeRegistry::default()
        }
        .with("BRAF", numbered_studies("NCT", 2)));
        let session = Arc::new(MatchSession::new());
        let dictionary = Arc::new(OncoTreeTrialIndex::default());

        let first = {
            let registry = registry.clone();
            let session = session.clone();
            let dictionary = dictionary.clone();
            tokio::spawn(async move {
                session
                    .run(
                        registry.as_ref(),
                        dictionary.as_ref(),
                        Arc::new(criteria(&["BRAF"], &[], 30, "Male")),
                        &[],
                        &MatchConfig::default(),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let token = session.begin();
        let second = run_match(
            registry.as_ref(),
            dictionary.as_ref(),
            &criteria(&["BRAF"], &[], 30, "Male"),
            &[],
            &MatchConfig::default(),
            &token,
        )
        .await
        .unwrap();

        let first = first.await.unwrap();
        assert!(matches!(first, Err(TrialMatchError::Cancelled)));
        assert_eq!(second.entries.len(), 2);
        assert!(second.entries.iter().all(|e| e.hit_count() == 1));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn match_futures_are_send() {
        let registry = FakeRegistry::default();
        let dictionary = OncoTreeTrialIndex::default();
        let criteria = criteria(&["BRAF", "NRAS"], &[], 40, "All");
        let config = MatchConfig::default();
        let token = CancellationToken::new();
        let session = MatchSession::new();

        let run = run_match(&registry, &dictionary, &criteria, &[], &config, &token);
        assert_send(&run);
        let session_run = session.run(
            &registry,
            &dictionary,
            Arc::new(criteria.clone()),
            &[],
            &config,
        );
        assert_send(&session_run);
    }

    #[test]
    fn rank_is_stable_for_equal_scores() {
        let mut index = TrialMatchIndex::new();
        for s in numbered_studies("NCT", 3) {
            index.add_hit(Arc::new(s), "X");
        }
        let mut entries = index.into_entries();
        rank(&mut entries);
        let ids = entries.iter().map(|e| e.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["NCT00001", "NCT00002", "NCT00003"]);
    }

    #[test]
    fn config_defaults_match_registry_contract() {
        let config = MatchConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.page_timeout, Duration::from_secs(30));
        assert_eq!(config.keyword_concurrency, 1);
    }
}

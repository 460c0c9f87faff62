//! Projects ranked entries into display records.

use serde::Serialize;

use crate::matching::study_list::AggregatedTrialEntry;
use crate::matching::{KeywordFailure, MatchOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedTrialMatch {
    pub hit_count: usize,
    pub keywords: String,
    pub conditions: Vec<String>,
    pub title: String,
    pub nct_id: String,
    pub status: String,
    pub locations: Vec<String>,
    pub interventions: Vec<String>,
    pub eligibility_text: String,
    pub score: u32,
    pub condition_matching: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explanations: Vec<String>,
}

impl DetailedTrialMatch {
    pub fn from_entry(entry: &AggregatedTrialEntry) -> Self {
        let study = entry.study();
        let breakdown = entry.breakdown();
        Self {
            hit_count: entry.hit_count(),
            keywords: entry.matched_keywords().join(","),
            conditions: study.conditions.clone(),
            title: study.title.clone(),
            nct_id: study.id.clone(),
            status: study.overall_status.clone(),
            locations: study.locations.iter().map(|l| l.display_line()).collect(),
            interventions: study.interventions.clone(),
            eligibility_text: study.eligibility.criteria_text.clone(),
            score: entry.score(),
            condition_matching: breakdown.is_some_and(|b| b.condition_match),
            explanations: breakdown.map(|b| b.explanations()).unwrap_or_default(),
        }
    }
}

/// Keeps the input order, which is already the ranking.
pub fn assemble(entries: &[AggregatedTrialEntry]) -> Vec<DetailedTrialMatch> {
    entries.iter().map(DetailedTrialMatch::from_entry).collect()
}

/// Everything a renderer needs for one finished run.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub keywords: Vec<String>,
    pub total_trials: usize,
    pub matches: Vec<DetailedTrialMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<KeywordFailure>,
}

impl MatchReport {
    /// Keeps the top `limit` trials; `None` keeps all of them.
    pub fn from_outcome(outcome: &MatchOutcome, limit: Option<usize>) -> Self {
        let shown = limit.map_or(outcome.entries.len(), |n| n.min(outcome.entries.len()));
        Self {
            keywords: outcome.keywords.clone(),
            total_trials: outcome.entries.len(),
            matches: assemble(&outcome.entries[..shown]),
            failures: outcome.failures.clone(),
        }
    }
}

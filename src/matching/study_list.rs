//! Per-run aggregation of keyword hits, keyed by registry trial id.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entities::study::{RegistryStudy, Sex};
use crate::matching::eligibility::parse_age;
use crate::matching::score::ScoreBreakdown;

/// One unique trial seen during a run, with every keyword that surfaced it.
#[derive(Debug, Clone)]
pub struct AggregatedTrialEntry {
    study: Arc<RegistryStudy>,
    matched_keywords: Vec<String>,
    parsed_min_age: Option<f64>,
    parsed_max_age: Option<f64>,
    parsed_sex: Sex,
    breakdown: Option<ScoreBreakdown>,
}

impl AggregatedTrialEntry {
    fn new(study: Arc<RegistryStudy>, keyword: &str) -> Self {
        let eligibility = &study.eligibility;
        let parsed_min_age = eligibility.min_age.as_deref().and_then(parse_age);
        let parsed_max_age = eligibility.max_age.as_deref().and_then(parse_age);
        let parsed_sex = eligibility.sex;
        Self {
            matched_keywords: vec![keyword.to_string()],
            parsed_min_age,
            parsed_max_age,
            parsed_sex,
            breakdown: None,
            study,
        }
    }

    fn add_found(&mut self, keyword: &str) {
        self.matched_keywords.push(keyword.to_string());
    }

    pub fn study(&self) -> &RegistryStudy {
        &self.study
    }

    pub fn id(&self) -> &str {
        &self.study.id
    }

    /// Number of keyword hits; always equal to `matched_keywords().len()`.
    pub fn hit_count(&self) -> usize {
        self.matched_keywords.len()
    }

    pub fn matched_keywords(&self) -> &[String] {
        &self.matched_keywords
    }

    pub fn parsed_min_age(&self) -> Option<f64> {
        self.parsed_min_age
    }

    pub fn parsed_max_age(&self) -> Option<f64> {
        self.parsed_max_age
    }

    pub fn parsed_sex(&self) -> Sex {
        self.parsed_sex
    }

    /// Zero until the scoring pass has run.
    pub fn score(&self) -> u32 {
        self.breakdown.as_ref().map_or(0, ScoreBreakdown::total)
    }

    pub fn breakdown(&self) -> Option<&ScoreBreakdown> {
        self.breakdown.as_ref()
    }

    pub(crate) fn apply_score(&mut self, breakdown: ScoreBreakdown) {
        self.breakdown = Some(breakdown);
    }
}

/// Trial id → aggregated entry for a single run. Entries keep the order in
/// which their trial was first seen so that ranking ties are deterministic.
#[derive(Debug, Default)]
pub struct TrialMatchIndex {
    positions: HashMap<String, usize>,
    entries: Vec<AggregatedTrialEntry>,
}

impl TrialMatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one hit of `study` for `keyword`. Every call counts: a repeated
    /// (study, keyword) pair increments the hit count again.
    pub fn add_hit(&mut self, study: Arc<RegistryStudy>, keyword: &str) {
        if let Some(&pos) = self.positions.get(&study.id) {
            self.entries[pos].add_found(keyword);
            return;
        }
        self.positions.insert(study.id.clone(), self.entries.len());
        self.entries.push(AggregatedTrialEntry::new(study, keyword));
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&AggregatedTrialEntry> {
        self.positions.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut AggregatedTrialEntry> {
        self.entries.iter_mut()
    }

    pub fn into_entries(self) -> Vec<AggregatedTrialEntry> {
        self.entries
    }
}

//! Fixed weight ladder: condition match > sex match > age match > hit volume.

use std::collections::HashSet;

use serde::Serialize;

use crate::entities::study::Sex;
use crate::matching::study_list::AggregatedTrialEntry;

pub const CONDITION_WEIGHT: u32 = 10_000;
pub const SEX_WEIGHT: u32 = 1_000;
pub const AGE_WEIGHT: u32 = 100;

/// Inputs shared by every entry of a run's scoring pass.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub condition_matches: HashSet<String>,
    pub patient_sex: Sex,
    pub patient_age: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub condition_match: bool,
    pub sex_match: bool,
    pub age_match: bool,
    pub hit_count: u32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u32 {
        let mut s = 0_u32;
        if self.condition_match {
            s += CONDITION_WEIGHT;
        }
        if self.sex_match {
            s += SEX_WEIGHT;
        }
        if self.age_match {
            s += AGE_WEIGHT;
        }
        s.saturating_add(self.hit_count)
    }

    /// One line per awarded weight, highest first.
    pub fn explanations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.condition_match {
            out.push(format!(
                "+{CONDITION_WEIGHT}: trial is listed for the patient's cancer type"
            ));
        }
        if self.sex_match {
            out.push(format!("+{SEX_WEIGHT}: sex eligibility matches"));
        }
        if self.age_match {
            out.push(format!("+{AGE_WEIGHT}: patient age is within the eligible range"));
        }
        out.push(format!(
            "+{}: found by {} keyword search{}",
            self.hit_count,
            self.hit_count,
            if self.hit_count == 1 { "" } else { "es" }
        ));
        out
    }
}

pub fn sex_matches(trial_sex: Sex, patient_sex: Sex) -> bool {
    trial_sex == Sex::All || patient_sex == Sex::All || trial_sex == patient_sex
}

/// Missing bounds are no constraint; present bounds are inclusive.
pub fn age_matches(min_age: Option<f64>, max_age: Option<f64>, patient_age: f64) -> bool {
    let above_min = min_age.is_none_or(|min| patient_age >= min);
    let below_max = max_age.is_none_or(|max| patient_age <= max);
    above_min && below_max
}

pub fn score(entry: &AggregatedTrialEntry, ctx: &ScoringContext) -> ScoreBreakdown {
    ScoreBreakdown {
        condition_match: ctx.condition_matches.contains(entry.id()),
        sex_match: sex_matches(entry.parsed_sex(), ctx.patient_sex),
        age_match: age_matches(
            entry.parsed_min_age(),
            entry.parsed_max_age(),
            ctx.patient_age,
        ),
        hit_count: u32::try_from(entry.hit_count()).unwrap_or(u32::MAX),
    }
}

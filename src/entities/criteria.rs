use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Overall recruitment status values accepted by the registry filter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RecruitingStatus {
    NotYetRecruiting,
    Recruiting,
    EnrollingByInvitation,
    ActiveNotRecruiting,
    Suspended,
    Terminated,
    Completed,
    Withdrawn,
    UnknownStatus,
}

impl RecruitingStatus {
    /// Status label as it appears in the registry's `OverallStatus` field.
    pub fn registry_label(self) -> &'static str {
        match self {
            Self::NotYetRecruiting => "Not yet recruiting",
            Self::Recruiting => "Recruiting",
            Self::EnrollingByInvitation => "Enrolling by invitation",
            Self::ActiveNotRecruiting => "Active, not recruiting",
            Self::Suspended => "Suspended",
            Self::Terminated => "Terminated",
            Self::Completed => "Completed",
            Self::Withdrawn => "Withdrawn",
            Self::UnknownStatus => "Unknown status",
        }
    }
}

/// Immutable snapshot of one user-triggered search. A new search builds a
/// new value; nothing mutates a snapshot a run is already reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub countries: BTreeSet<String>,
    pub recruiting_statuses: BTreeSet<RecruitingStatus>,
    pub required_gene_symbols: Vec<String>,
    pub optional_gene_symbols: Vec<String>,
    pub patient_gender: String,
    pub patient_location: String,
    pub patient_age: u32,
}

impl SearchCriteria {
    /// Search terms for the run: optional symbols followed by required ones,
    /// trimmed, blank entries dropped, case-insensitive duplicates removed
    /// (first spelling wins).
    pub fn keywords(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for symbol in self
            .optional_gene_symbols
            .iter()
            .chain(self.required_gene_symbols.iter())
        {
            let symbol = symbol.trim();
            if symbol.is_empty() {
                continue;
            }
            if out.iter().any(|k| k.eq_ignore_ascii_case(symbol)) {
                continue;
            }
            out.push(symbol.to_string());
        }
        out
    }

    /// Required symbols sent alongside every keyword query.
    pub fn auxiliary_keywords(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for symbol in &self.required_gene_symbols {
            let symbol = symbol.trim();
            if symbol.is_empty() || out.iter().any(|k| k.eq_ignore_ascii_case(symbol)) {
                continue;
            }
            out.push(symbol.to_string());
        }
        out
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrialMatchError;

/// Read-only patient facts the matcher consumes: mutated genes, one disease
/// classification code per sample, and demographics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub mutated_genes: Vec<String>,
    #[serde(default)]
    pub condition_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
}

impl PatientContext {
    pub async fn load_from_path(path: &Path) -> Result<Self, TrialMatchError> {
        let bytes = tokio::fs::read(path).await?;
        let ctx: Self = serde_json::from_slice(&bytes)?;
        Ok(ctx.normalized())
    }

    /// Trims values and drops blank or duplicate genes and codes.
    pub fn normalized(mut self) -> Self {
        self.mutated_genes = dedup_trimmed(self.mutated_genes);
        self.condition_codes = dedup_trimmed(self.condition_codes);
        self.sex = self
            .sex
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }
}

pub(crate) fn dedup_trimmed(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if value.is_empty() || out.iter().any(|v| v.eq_ignore_ascii_case(value)) {
            continue;
        }
        out.push(value.to_string());
    }
    out
}

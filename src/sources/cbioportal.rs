use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::patient::{PatientContext, dedup_trimmed};
use crate::error::TrialMatchError;
use crate::sources::CachePolicy;

pub(crate) const CBIOPORTAL_BASE: &str = "https://www.cbioportal.org/api";
pub(crate) const CBIOPORTAL_BASE_ENV: &str = "TRIALMATCH_CBIOPORTAL_BASE";
const CBIOPORTAL_API: &str = "cbioportal";

const ONCOTREE_CODE_ATTRIBUTE: &str = "ONCOTREE_CODE";
const AGE_ATTRIBUTE: &str = "AGE";
const SEX_ATTRIBUTE: &str = "SEX";

pub struct CBioPortalClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl CBioPortalClient {
    pub fn new() -> Result<Self, TrialMatchError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CBIOPORTAL_BASE, CBIOPORTAL_BASE_ENV),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Self {
        Self {
            client: crate::sources::test_client(),
            base: Cow::Owned(base),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_ref().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, TrialMatchError> {
        crate::sources::send_json(CBIOPORTAL_API, req, CachePolicy::Shared).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        req: reqwest_middleware::RequestBuilder,
        body: &B,
    ) -> Result<T, TrialMatchError> {
        self.get_json(req.json(body)).await
    }

    async fn patient_samples(
        &self,
        study_id: &str,
        patient_id: &str,
    ) -> Result<Vec<String>, TrialMatchError> {
        let url = self.endpoint(&format!(
            "studies/{study_id}/patients/{patient_id}/samples"
        ));
        let rows: Vec<CBioSample> = self.get_json(self.client.get(&url)).await?;
        Ok(dedup_trimmed(
            rows.into_iter().filter_map(|s| s.sample_id).collect(),
        ))
    }

    /// One OncoTree code per sample, in sample order.
    async fn sample_oncotree_codes(
        &self,
        study_id: &str,
        sample_ids: &[String],
    ) -> Result<Vec<String>, TrialMatchError> {
        let url = self.endpoint(&format!("studies/{study_id}/clinical-data/fetch"));
        let body = CBioClinicalDataSingleStudyFilter {
            attribute_ids: vec![ONCOTREE_CODE_ATTRIBUTE.to_string()],
            ids: sample_ids.to_vec(),
        };
        let rows: Vec<CBioClinicalData> = self
            .post_json(
                self.client
                    .post(&url)
                    .query(&[("clinicalDataType", "SAMPLE")]),
                &body,
            )
            .await?;

        let mut codes = Vec::new();
        for sample_id in sample_ids {
            let code = rows.iter().find_map(|row| {
                let same_sample = row.sample_id.as_deref() == Some(sample_id.as_str());
                let is_code = row
                    .clinical_attribute_id
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(ONCOTREE_CODE_ATTRIBUTE));
                (same_sample && is_code)
                    .then(|| row.value.as_deref())
                    .flatten()
            });
            if let Some(code) = code {
                codes.push(code.to_string());
            }
        }
        Ok(dedup_trimmed(codes))
    }

    async fn patient_attributes(
        &self,
        study_id: &str,
        patient_id: &str,
    ) -> Result<(Option<u32>, Option<String>), TrialMatchError> {
        let url = self.endpoint(&format!(
            "studies/{study_id}/patients/{patient_id}/clinical-data"
        ));
        let rows: Vec<CBioClinicalData> = self.get_json(self.client.get(&url)).await?;

        let value_of = |attr: &str| {
            rows.iter()
                .find(|r| {
                    r.clinical_attribute_id
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(attr))
                })
                .and_then(|r| r.value.as_deref())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let age = value_of(AGE_ATTRIBUTE).and_then(parse_clinical_age);
        let sex = value_of(SEX_ATTRIBUTE).map(str::to_string);
        Ok((age, sex))
    }

    async fn mutated_genes(
        &self,
        study_id: &str,
        sample_ids: &[String],
    ) -> Result<Vec<String>, TrialMatchError> {
        let url = self.endpoint(&format!(
            "molecular-profiles/{study_id}_mutations/mutations/fetch"
        ));
        let body = CBioMutationFilter {
            sample_ids: sample_ids.to_vec(),
        };
        let rows: Vec<CBioMutation> = self
            .post_json(
                self.client
                    .post(&url)
                    .query(&[("projection", "DETAILED")]),
                &body,
            )
            .await?;

        let symbols = rows
            .into_iter()
            .filter_map(|m| m.gene.and_then(|g| g.hugo_gene_symbol))
            .filter(|s| crate::sources::is_valid_gene_symbol(s.trim()))
            .collect();
        Ok(dedup_trimmed(symbols))
    }

    /// Builds the matching context for one patient of a cBioPortal study.
    pub async fn patient_context(
        &self,
        study_id: &str,
        patient_id: &str,
    ) -> Result<PatientContext, TrialMatchError> {
        let study_id = study_id.trim();
        let patient_id = patient_id.trim();
        if study_id.is_empty() || patient_id.is_empty() {
            return Err(TrialMatchError::InvalidArgument(
                "cBioPortal lookup requires both a study id and a patient id".into(),
            ));
        }

        let sample_ids = self.patient_samples(study_id, patient_id).await?;
        let (age, sex) = self.patient_attributes(study_id, patient_id).await?;
        if sample_ids.is_empty() {
            debug!(study_id, patient_id, "patient has no samples");
            return Ok(PatientContext {
                patient_id: Some(patient_id.to_string()),
                age,
                sex,
                ..PatientContext::default()
            });
        }

        let condition_codes = self.sample_oncotree_codes(study_id, &sample_ids).await?;
        let mutated_genes = self.mutated_genes(study_id, &sample_ids).await?;
        debug!(
            study_id,
            patient_id,
            samples = sample_ids.len(),
            genes = mutated_genes.len(),
            codes = condition_codes.len(),
            "cBioPortal patient context loaded"
        );

        Ok(PatientContext {
            patient_id: Some(patient_id.to_string()),
            mutated_genes,
            condition_codes,
            age,
            sex,
        })
    }
}

/// Clinical ages are whole or fractional years (`"45"`, `"45.7"`).
fn parse_clinical_age(value: &str) -> Option<u32> {
    let years: f64 = value.trim().parse().ok()?;
    if !years.is_finite() || years < 0.0 || years > f64::from(u32::MAX) {
        return None;
    }
    Some(years.floor() as u32)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CBioSample {
    sample_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CBioClinicalDataSingleStudyFilter {
    attribute_ids: Vec<String>,
    ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CBioClinicalData {
    sample_id: Option<String>,
    clinical_attribute_id: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CBioMutationFilter {
    sample_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CBioMutation {
    gene: Option<CBioGene>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CBioGene {
    hugo_gene_symbol: Option<String>,
}

use std::borrow::Cow;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::TrialMatchError;
use crate::matching::paginate::{RegistryPage, RegistryQuery, TrialRegistry};
use crate::sources::CachePolicy;
use crate::utils::serde::StringOrVec;

pub(crate) const CTGOV_BASE: &str = "https://clinicaltrials.gov/api";
pub(crate) const CTGOV_BASE_ENV: &str = "TRIALMATCH_CTGOV_BASE";
const CTGOV_API: &str = "clinicaltrials.gov";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovSearchResponse {
    #[serde(default)]
    pub full_studies_response: CtGovFullStudies,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovFullStudies {
    #[serde(default, rename = "NStudiesFound")]
    pub n_studies_found: usize,
    #[serde(default)]
    pub full_studies: Vec<CtGovFullStudy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovFullStudy {
    #[serde(default)]
    pub study: CtGovStudy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovStudy {
    #[serde(default)]
    pub protocol_section: CtGovProtocolSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovProtocolSection {
    #[serde(default)]
    pub identification_module: CtGovIdentification,
    #[serde(default)]
    pub status_module: CtGovStatus,
    #[serde(default)]
    pub conditions_module: CtGovConditions,
    #[serde(default)]
    pub eligibility_module: CtGovEligibility,
    #[serde(default)]
    pub contacts_locations_module: CtGovContactsLocations,
    #[serde(default)]
    pub arms_interventions_module: CtGovArmsInterventions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovIdentification {
    #[serde(rename = "NCTId")]
    pub nct_id: Option<String>,
    pub official_title: Option<String>,
    pub brief_title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovStatus {
    pub overall_status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovConditions {
    #[serde(default)]
    pub condition_list: CtGovConditionList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovConditionList {
    #[serde(default)]
    pub condition: StringOrVec,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovEligibility {
    pub minimum_age: Option<String>,
    pub maximum_age: Option<String>,
    pub gender: Option<String>,
    pub eligibility_criteria: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovContactsLocations {
    #[serde(default)]
    pub location_list: CtGovLocationList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovLocationList {
    #[serde(default)]
    pub location: Vec<CtGovLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovLocation {
    pub location_facility: Option<String>,
    pub location_city: Option<String>,
    pub location_status: Option<String>,
    pub location_country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovArmsInterventions {
    #[serde(default)]
    pub intervention_list: CtGovInterventionList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovInterventionList {
    #[serde(default)]
    pub intervention: Vec<CtGovIntervention>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CtGovIntervention {
    pub intervention_name: Option<String>,
}

#[derive(Clone)]
pub struct CtGovClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
}

impl CtGovClient {
    pub fn new() -> Result<Self, TrialMatchError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(CTGOV_BASE, CTGOV_BASE_ENV),
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

    pub async fn full_studies(
        &self,
        expr: &str,
        min_rnk: usize,
        max_rnk: usize,
    ) -> Result<CtGovSearchResponse, TrialMatchError> {
        if expr.trim().is_empty() {
            return Err(TrialMatchError::InvalidArgument(
                "Registry search expression is empty".into(),
            ));
        }
        if min_rnk == 0 || max_rnk < min_rnk {
            return Err(TrialMatchError::InvalidArgument(format!(
                "Invalid registry page window {min_rnk}..{max_rnk}"
            )));
        }

        let url = self.endpoint("query/full_studies");
        let min_rnk = min_rnk.to_string();
        let max_rnk = max_rnk.to_string();
        let req = self.client.get(&url).query(&[
            ("expr", expr),
            ("min_rnk", min_rnk.as_str()),
            ("max_rnk", max_rnk.as_str()),
            ("fmt", "json"),
        ]);
        // Trial records are fetched fresh each run and never written to disk.
        crate::sources::send_json(CTGOV_API, req, CachePolicy::NoStore).await
    }
}

#[async_trait]
impl TrialRegistry for CtGovClient {
    fn name(&self) -> &str {
        CTGOV_API
    }

    async fn search(&self, query: &RegistryQuery) -> Result<RegistryPage, TrialMatchError> {
        let expr = crate::utils::query::build_search_expr(
            &query.keyword,
            &query.auxiliary_keywords,
            &query.countries,
            &query.statuses,
        );
        let resp = self
            .full_studies(&expr, query.page_start, query.page_end)
            .await?
            .full_studies_response;

        let returned = resp.full_studies.len();
        let studies = resp
            .full_studies
            .iter()
            .filter_map(|s| crate::transform::study::from_ctgov_study(&s.study))
            .collect::<Vec<_>>();
        if studies.len() < returned {
            debug!(
                dropped = returned - studies.len(),
                "skipped registry records without an NCT id"
            );
        }

        Ok(RegistryPage {
            total_found: resp.n_studies_found,
            studies,
        })
    }
}

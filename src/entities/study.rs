use serde::{Deserialize, Serialize};

/// Sex restriction of a trial, or the patient's sex after normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sex {
    Male,
    Female,
    #[default]
    All,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "MALE",
            Self::Female => "FEMALE",
            Self::All => "ALL",
        }
    }
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyLocation {
    pub city: String,
    pub facility: String,
    pub status: String,
}

/// Eligibility block as published by the registry. Ages stay as free text
/// (`"18 Years"`); they are parsed once when a study enters aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyEligibility {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    pub sex: Sex,
    pub criteria_text: String,
}

/// One registry trial record with every optional sub-structure already
/// defaulted. Downstream code never has to probe for missing fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStudy {
    pub id: String,
    pub title: String,
    pub conditions: Vec<String>,
    pub locations: Vec<StudyLocation>,
    pub interventions: Vec<String>,
    pub eligibility: StudyEligibility,
    pub overall_status: String,
}

impl StudyLocation {
    pub fn display_line(&self) -> String {
        format!("{}: {}: {}", self.city, self.facility, self.status)
    }
}

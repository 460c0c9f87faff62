use crate::entities::study::{RegistryStudy, StudyEligibility, StudyLocation};
use crate::matching::eligibility::normalize_sex;
use crate::sources::clinicaltrials::{CtGovLocation, CtGovStudy};

fn clean_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn clean_list<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    values
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_age(value: Option<&str>) -> Option<String> {
    clean_opt(value).filter(|v| !v.eq_ignore_ascii_case("n/a"))
}

fn transform_location(loc: &CtGovLocation) -> Option<StudyLocation> {
    let city = clean_opt(loc.location_city.as_deref());
    let facility = clean_opt(loc.location_facility.as_deref());
    if city.is_none() && facility.is_none() {
        return None;
    }
    Some(StudyLocation {
        city: city.unwrap_or_default(),
        facility: facility.unwrap_or_default(),
        status: clean_opt(loc.location_status.as_deref()).unwrap_or_default(),
    })
}

/// Maps one registry record, defaulting every absent sub-structure.
/// Records without an NCT id are rejected.
pub fn from_ctgov_study(study: &CtGovStudy) -> Option<RegistryStudy> {
    let protocol = &study.protocol_section;
    let ident = &protocol.identification_module;
    let id = clean_opt(ident.nct_id.as_deref())?;

    let title = clean_opt(ident.official_title.as_deref())
        .or_else(|| clean_opt(ident.brief_title.as_deref()))
        .unwrap_or_default();

    let raw_conditions = protocol
        .conditions_module
        .condition_list
        .condition
        .clone()
        .into_vec();
    let conditions = clean_list(raw_conditions.iter().map(String::as_str));

    let locations = protocol
        .contacts_locations_module
        .location_list
        .location
        .iter()
        .filter_map(transform_location)
        .collect();

    let interventions = clean_list(
        protocol
            .arms_interventions_module
            .intervention_list
            .intervention
            .iter()
            .filter_map(|i| i.intervention_name.as_deref()),
    );

    let elig = &protocol.eligibility_module;
    let eligibility = StudyEligibility {
        min_age: normalize_age(elig.minimum_age.as_deref()),
        max_age: normalize_age(elig.maximum_age.as_deref()),
        sex: normalize_sex(elig.gender.as_deref().unwrap_or_default()),
        criteria_text: clean_opt(elig.eligibility_criteria.as_deref()).unwrap_or_default(),
    };

    Some(RegistryStudy {
        id,
        title,
        conditions,
        locations,
        interventions,
        eligibility,
        overall_status: clean_opt(protocol.status_module.overall_status.as_deref())
            .unwrap_or_default(),
    })
}

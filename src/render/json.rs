use serde::Serialize;

use crate::error::TrialMatchError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, TrialMatchError> {
    Ok(serde_json::to_string_pretty(value)?)
}

//! Output renderers for match results.

pub(crate) mod json;
pub(crate) mod markdown;

//! Domain records shared by the registry clients, the matcher and the renderers.

pub(crate) mod criteria;
pub(crate) mod patient;
pub(crate) mod study;

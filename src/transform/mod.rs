//! Transform adapters from upstream API shapes into matching-facing entity models.

pub(crate) mod study;

//! Internal utility helpers for the cache directory, registry query expressions, and serde shapes.

use std::path::PathBuf;

pub(crate) mod query;
pub(crate) mod serde;

pub fn trialmatch_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("trialmatch"),
        None => std::env::temp_dir().join("trialmatch"),
    }
}

#[cfg(test)]
mod tests {
    use super::trialmatch_cache_dir;

    #[test]
    fn cache_dir_is_namespaced() {
        assert!(trialmatch_cache_dir().ends_with("trialmatch"));
    }
}

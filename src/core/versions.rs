//! Runtime versions record
//!
//! Maps runtime component names (the bytecode engine, the platform ABI, the
//! host runtime, ...) to version strings. Containers and archives carry the
//! record they were produced under; the loader compares it with the running
//! engine before it trusts any cached bytecode.

use crate::error::{Result, TmcoError};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Component name used for the bytecode engine unless configured otherwise
pub const DEFAULT_ENGINE_COMPONENT: &str = "engine";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions(BTreeMap<String, String>);

impl Versions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, component: impl Into<String>, version: impl Into<String>) -> Self {
        self.insert(component, version);
        self
    }

    pub fn insert(&mut self, component: impl Into<String>, version: impl Into<String>) {
        self.0.insert(component.into(), version.into());
    }

    pub fn get(&self, component: &str) -> Option<&str> {
        self.0.get(component).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Gate cached bytecode produced under `self` against the `running` runtime
    ///
    /// The engine component must agree exactly on major.minor.patch: cached
    /// bytecode is tied to the engine build. Any other difference is logged
    /// and otherwise ignored.
    pub fn check_compatible(&self, running: &Versions, engine: &str) -> Result<()> {
        let expected = running.get(engine).unwrap_or("<unknown>");
        let found = self.get(engine).unwrap_or("<missing>");

        let compatible = match (parse_triple(expected), parse_triple(found)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };

        if !compatible {
            return Err(TmcoError::IncompatibleCache {
                component: engine.to_string(),
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        for (component, ours) in running.iter().filter(|(c, _)| *c != engine) {
            match self.get(component) {
                Some(theirs) if theirs != ours => warn!(
                    "Version mismatch for {}: built with {}, running {}",
                    component, theirs, ours
                ),
                None => warn!("Cached data does not record a {} version", component),
                _ => {}
            }
        }

        Ok(())
    }
}

impl FromIterator<(String, String)> for Versions {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Versions(iter.into_iter().collect())
    }
}

/// Leniently read `major.minor.patch` out of a version string
///
/// Engine versions are often not semver ("10.2.154.26-node.26"), so a leading
/// `v` is dropped, then the first three dot-separated numeric runs are taken.
/// Missing components count as zero.
pub fn parse_triple(version: &str) -> Option<Version> {
    let trimmed = version.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(trimmed) {
        return Some(Version::new(v.major, v.minor, v.patch));
    }

    let mut parts = [0u64; 3];
    let mut seen = 0;
    for (slot, piece) in parts.iter_mut().zip(trimmed.split('.')) {
        let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            break;
        }
        *slot = digits.parse().ok()?;
        seen += 1;
        if digits.len() != piece.len() {
            break;
        }
    }

    if seen == 0 {
        return None;
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Versions {
        Versions::new()
            .with("engine", "10.2.154.26-node.26")
            .with("abi", "108")
            .with("host", "18.17.1")
    }

    #[test]
    fn test_parse_triple() {
        assert_eq!(parse_triple("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_triple("v18.17.1"), Some(Version::new(18, 17, 1)));
        assert_eq!(
            parse_triple("10.2.154.26-node.26"),
            Some(Version::new(10, 2, 154))
        );
        assert_eq!(parse_triple("108"), Some(Version::new(108, 0, 0)));
        assert_eq!(parse_triple("7.8-beta"), Some(Version::new(7, 8, 0)));
        assert_eq!(parse_triple("unknown"), None);
    }

    #[test]
    fn test_encode_decode() {
        let versions = running();
        let decoded = Versions::decode(&versions.encode().unwrap()).unwrap();
        assert_eq!(decoded, versions);
    }

    #[test]
    fn test_exact_engine_match_passes() {
        assert!(running().check_compatible(&running(), "engine").is_ok());
    }

    #[test]
    fn test_engine_build_suffix_ignored() {
        let built = running().with("engine", "10.2.154.4");
        assert!(built.check_compatible(&running(), "engine").is_ok());
    }

    #[test]
    fn test_engine_patch_mismatch_fails() {
        let built = running().with("engine", "10.2.155.26-node.26");
        match built.check_compatible(&running(), "engine") {
            Err(TmcoError::IncompatibleCache {
                component,
                expected,
                found,
            }) => {
                assert_eq!(component, "engine");
                assert_eq!(expected, "10.2.154.26-node.26");
                assert_eq!(found, "10.2.155.26-node.26");
            }
            other => panic!("expected IncompatibleCache, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_engine_fails() {
        let built = Versions::new().with("host", "18.17.1");
        assert!(matches!(
            built.check_compatible(&running(), "engine"),
            Err(TmcoError::IncompatibleCache { .. })
        ));
    }

    #[test]
    fn test_other_components_are_not_fatal() {
        let built = running().with("host", "20.0.0").with("abi", "115");
        assert!(built.check_compatible(&running(), "engine").is_ok());
    }
}

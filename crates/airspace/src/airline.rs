//! Callsign to airline name resolution.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::aircraft::UNKNOWN_CALLSIGN;
use crate::error::{Error, Result};

/// Number of leading callsign characters that identify the carrier.
const PREFIX_LEN: usize = 3;

/// Resolves raw callsigns to display names using a static prefix table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AirlineResolver {
    codes: BTreeMap<String, String>,
}

impl AirlineResolver {
    /// Create a resolver from a prefix to name table.
    ///
    /// Prefixes are normalised to upper case.
    #[must_use]
    pub fn new(codes: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            codes: codes
                .into_iter()
                .map(|(prefix, name)| (prefix.trim().to_uppercase(), name))
                .collect(),
        }
    }

    /// Load a prefix table from a JSON object file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object of
    /// strings.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::StoreFile {
            path: path.to_path_buf(),
            source,
        })?;
        let codes: BTreeMap<String, String> = serde_json::from_str(&raw)?;
        Ok(Self::new(codes))
    }

    /// Build the resolver from an inline table and an optional file.
    ///
    /// Entries from the file override inline entries. A missing or broken
    /// file is logged and ignored.
    #[must_use]
    pub fn load(inline: &BTreeMap<String, String>, file: Option<&Path>) -> Self {
        let mut resolver = Self::new(inline.clone());
        if let Some(path) = file {
            match Self::from_file(path) {
                Ok(from_file) => {
                    info!(
                        path = %path.display(),
                        count = from_file.len(),
                        "Loaded airline table"
                    );
                    resolver.codes.extend(from_file.codes);
                }
                Err(e) => warn!(path = %path.display(), "Ignoring airline table: {e}"),
            }
        }
        resolver
    }

    /// Number of known prefixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Resolve a raw callsign to a display name.
    ///
    /// Falls back to the trimmed callsign when the prefix is unknown, and to
    /// `UNKNOWN` when the callsign is empty.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> String {
        let callsign = raw.trim();
        if callsign.is_empty() {
            return UNKNOWN_CALLSIGN.to_string();
        }
        let prefix: String = callsign.chars().take(PREFIX_LEN).collect::<String>().to_uppercase();
        self.codes
            .get(&prefix)
            .cloned()
            .unwrap_or_else(|| callsign.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn resolver() -> AirlineResolver {
        AirlineResolver::new([
            ("DLH".to_string(), "Lufthansa".to_string()),
            ("ezy".to_string(), "easyJet".to_string()),
        ])
    }

    #[test]
    fn test_resolve_known_prefix() {
        assert_eq!(resolver().resolve("DLH4AB"), "Lufthansa");
    }

    #[test]
    fn test_resolve_normalises_case_and_whitespace() {
        assert_eq!(resolver().resolve("  dlh12  "), "Lufthansa");
        assert_eq!(resolver().resolve("EZY81QL"), "easyJet");
    }

    #[test]
    fn test_resolve_unknown_prefix_falls_back_to_callsign() {
        assert_eq!(resolver().resolve(" DEABC "), "DEABC");
    }

    #[test]
    fn test_resolve_empty_is_unknown() {
        assert_eq!(resolver().resolve(""), "UNKNOWN");
        assert_eq!(resolver().resolve("   "), "UNKNOWN");
    }

    #[test]
    fn test_resolve_short_callsign() {
        assert_eq!(resolver().resolve("DL"), "DL");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"AFR": "Air France", "swr": "Swiss"}}"#).unwrap();

        let resolver = AirlineResolver::from_file(file.path()).unwrap();
        assert_eq!(resolver.len(), 2);
        assert_eq!(resolver.resolve("SWR123"), "Swiss");
    }

    #[test]
    fn test_load_file_overrides_inline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"DLH": "Lufthansa Group"}}"#).unwrap();

        let inline = BTreeMap::from([
            ("DLH".to_string(), "Lufthansa".to_string()),
            ("BAW".to_string(), "British Airways".to_string()),
        ]);
        let resolver = AirlineResolver::load(&inline, Some(file.path()));
        assert_eq!(resolver.resolve("DLH1"), "Lufthansa Group");
        assert_eq!(resolver.resolve("BAW1"), "British Airways");
    }

    #[test]
    fn test_load_missing_file_keeps_inline() {
        let inline = BTreeMap::from([("DLH".to_string(), "Lufthansa".to_string())]);
        let resolver = AirlineResolver::load(&inline, Some(Path::new("/nonexistent/airlines.json")));
        assert_eq!(resolver.len(), 1);
    }
}

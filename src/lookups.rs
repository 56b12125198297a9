use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GeodataError;

/// Per-(year, scale, geography) source description from `sources.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Remote file paths, relative to the mirror base URL.
    pub file_list: Vec<String>,
    /// Attribute names whose values are concatenated into the HEROP_ID,
    /// in this order.
    pub herop_id_suffixes: Vec<String>,
    /// Attribute holding the human-readable feature name.
    pub name_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LsadPosition {
    Prefix,
    Suffix,
}

/// Meaning of a legal/statistical area description code from `lsad.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsadEntry {
    pub value: String,
    pub position: LsadPosition,
}

type SourceTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, SourceEntry>>>;

/// Read-only lookup tables, loaded once at startup and passed by reference
/// into every component that needs them.
#[derive(Debug, Clone)]
pub struct LookupRegistry {
    /// year -> scale -> geography -> entry
    sources: SourceTable,
    /// geography -> summary level code (e.g. county -> "050")
    summary_levels: BTreeMap<String, String>,
    /// LSAD code -> meaning
    lsad: BTreeMap<String, LsadEntry>,
}

impl LookupRegistry {
    pub fn from_dir(dir: &Path) -> Result<Self, GeodataError> {
        Ok(Self {
            sources: read_lookup(&dir.join("sources.json"))?,
            summary_levels: read_lookup(&dir.join("summary-levels.json"))?,
            lsad: read_lookup(&dir.join("lsad.json"))?,
        })
    }

    pub fn from_parts(
        sources: SourceTable,
        summary_levels: BTreeMap<String, String>,
        lsad: BTreeMap<String, LsadEntry>,
    ) -> Self {
        Self {
            sources,
            summary_levels,
            lsad,
        }
    }

    pub fn source(&self, year: &str, scale: &str, geography: &str) -> Option<&SourceEntry> {
        self.sources.get(year)?.get(scale)?.get(geography)
    }

    pub fn summary_level(&self, geography: &str) -> Option<&str> {
        self.summary_levels.get(geography).map(String::as_str)
    }

    pub fn lsad(&self, code: &str) -> Option<&LsadEntry> {
        self.lsad.get(code)
    }

    /// Reverse lookup for datasets that carry the qualifier text itself
    /// (e.g. "town") instead of the LSAD code.
    pub fn lsad_by_value(&self, value: &str) -> Option<&LsadEntry> {
        self.lsad.values().find(|entry| entry.value == value)
    }

    pub fn years(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn scales(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for scales in self.sources.values() {
            for scale in scales.keys() {
                if !out.contains(scale) {
                    out.push(scale.clone());
                }
            }
        }
        out.sort();
        out
    }

    pub fn geographies(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for scales in self.sources.values() {
            for geographies in scales.values() {
                for geography in geographies.keys() {
                    if !out.contains(geography) {
                        out.push(geography.clone());
                    }
                }
            }
        }
        out.sort();
        out
    }
}

fn read_lookup<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, GeodataError> {
    let content = fs::read_to_string(path).map_err(|err| GeodataError::LookupParse {
        path: PathBuf::from(path),
        message: err.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|err| GeodataError::LookupParse {
        path: PathBuf::from(path),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> LookupRegistry {
        let entry = SourceEntry {
            file_list: vec!["/tiger/GENZ2020/shp/cb_2020_us_county_500k.zip".to_string()],
            herop_id_suffixes: vec!["GEOID".to_string()],
            name_field: "NAME".to_string(),
        };
        let mut geographies = BTreeMap::new();
        geographies.insert("county".to_string(), entry);
        let mut scales = BTreeMap::new();
        scales.insert("500k".to_string(), geographies);
        let mut sources = BTreeMap::new();
        sources.insert("2020".to_string(), scales);

        let mut summary_levels = BTreeMap::new();
        summary_levels.insert("county".to_string(), "050".to_string());

        let mut lsad = BTreeMap::new();
        lsad.insert(
            "06".to_string(),
            LsadEntry {
                value: "County".to_string(),
                position: LsadPosition::Suffix,
            },
        );

        LookupRegistry::from_parts(sources, summary_levels, lsad)
    }

    #[test]
    fn source_lookup() {
        let registry = sample_registry();
        let entry = registry.source("2020", "500k", "county").unwrap();
        assert_eq!(entry.name_field, "NAME");
        assert!(registry.source("2020", "500k", "tract").is_none());
        assert!(registry.source("2018", "500k", "county").is_none());
    }

    #[test]
    fn axis_enumeration() {
        let registry = sample_registry();
        assert_eq!(registry.years(), vec!["2020"]);
        assert_eq!(registry.scales(), vec!["500k"]);
        assert_eq!(registry.geographies(), vec!["county"]);
    }

    #[test]
    fn lsad_reverse_lookup() {
        let registry = sample_registry();
        assert_eq!(registry.lsad("06").unwrap().value, "County");
        let entry = registry.lsad_by_value("County").unwrap();
        assert_eq!(entry.position, LsadPosition::Suffix);
        assert!(registry.lsad_by_value("Borough").is_none());
    }
}

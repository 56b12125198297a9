use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Shp,
    Geojson,
    Pmtiles,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Shp => write!(f, "shp"),
            OutputFormat::Geojson => write!(f, "geojson"),
            OutputFormat::Pmtiles => write!(f, "pmtiles"),
        }
    }
}

/// One unit of work: a (year, geography, scale) triple that exists in the
/// lookup registry. Constructed only by the job selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    year: String,
    geography: String,
    scale: String,
}

impl Job {
    pub fn new(year: &str, geography: &str, scale: &str) -> Self {
        Self {
            year: year.to_string(),
            geography: geography.to_string(),
            scale: scale.to_string(),
        }
    }

    pub fn year(&self) -> &str {
        &self.year
    }

    pub fn geography(&self) -> &str {
        &self.geography
    }

    pub fn scale(&self) -> &str {
        &self.scale
    }

    /// Canonical stem for every output artifact of this job.
    pub fn name_string(&self) -> String {
        format!("{}-{}-{}", self.geography, self.year, self.scale)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.geography, self.scale, self.year)
    }
}

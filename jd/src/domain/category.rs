//! Job categories and dispatch priority

use serde::{Deserialize, Serialize};

/// Grouping tag for jobs. Used for filtering and aggregate stats, never for behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobCategory {
    Ingestion,
    Generation,
    Publishing,
    Maintenance,
    Monitoring,
}

impl JobCategory {
    /// All categories in display order
    pub const ALL: [JobCategory; 5] = [
        Self::Ingestion,
        Self::Generation,
        Self::Publishing,
        Self::Maintenance,
        Self::Monitoring,
    ];
}

impl std::fmt::Display for JobCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingestion => write!(f, "ingestion"),
            Self::Generation => write!(f, "generation"),
            Self::Publishing => write!(f, "publishing"),
            Self::Maintenance => write!(f, "maintenance"),
            Self::Monitoring => write!(f, "monitoring"),
        }
    }
}

impl std::str::FromStr for JobCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ingestion" => Ok(Self::Ingestion),
            "generation" => Ok(Self::Generation),
            "publishing" => Ok(Self::Publishing),
            "maintenance" => Ok(Self::Maintenance),
            "monitoring" => Ok(Self::Monitoring),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Priority level for ordering equally-due jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

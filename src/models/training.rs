// Training run request models
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrainingProfile {
    QuickTest,
    Regular,
    HighQuality,
}

impl TrainingProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingProfile::QuickTest => "quick_test",
            TrainingProfile::Regular => "regular",
            TrainingProfile::HighQuality => "high_quality",
        }
    }

    /// Blank input selects `regular`; anything unrecognised is rejected
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" | "regular" => Some(TrainingProfile::Regular),
            "quick_test" => Some(TrainingProfile::QuickTest),
            "high_quality" => Some(TrainingProfile::HighQuality),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub dataset_name: String,
    #[serde(default)]
    pub output_name: String,
    #[serde(default)]
    pub profile: String,
    /// Overrides the configured TOML when non-empty
    #[serde(default)]
    pub toml_path: Option<String>,
}

/// Response to a training start; `pid` is absent when spawning failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStarted {
    pub status: String,
    pub pid: Option<u32>,
    pub output_dir: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse() {
        assert_eq!(TrainingProfile::parse(""), Some(TrainingProfile::Regular));
        assert_eq!(
            TrainingProfile::parse(" quick_test "),
            Some(TrainingProfile::QuickTest)
        );
        assert_eq!(
            TrainingProfile::parse("high_quality").map(|p| p.as_str()),
            Some("high_quality")
        );
        assert_eq!(TrainingProfile::parse("ultra"), None);
    }
}

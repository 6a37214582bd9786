//! Matchup configuration: search knobs and pixel quality rules
//!
//! The configuration is a flat JSON object. Three keys are scalar knobs of the
//! matchup itself; every other numeric key is a quality rule on the granule
//! field of the same name:
//!
//! ```json
//! {"search_center_radius": 5, "search_grid_delta": 5, "delta_hour": 2,
//!  "chi2": [0, 2], "nv_ref": [120, 170], "nv_dolp": [120, 170], "quality_flag": [0, 5]}
//! ```

use crate::types::{MatchupError, MatchupResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Raw rule value as written in the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Single(f64),
    List(Vec<f64>),
}

impl RuleValue {
    pub fn to_rule(&self) -> QualityRule {
        match self {
            RuleValue::Single(v) => QualityRule::Equals(*v),
            RuleValue::List(values) => match values.as_slice() {
                [v] => QualityRule::Equals(*v),
                [min, max] => QualityRule::Range {
                    min: *min,
                    max: *max,
                },
                other => QualityRule::Malformed(other.len()),
            },
        }
    }

    fn first(&self) -> Option<f64> {
        match self {
            RuleValue::Single(v) => Some(*v),
            RuleValue::List(values) => values.first().copied(),
        }
    }

    fn nth_or_first(&self, index: usize) -> Option<f64> {
        match self {
            RuleValue::Single(v) => Some(*v),
            RuleValue::List(values) if values.len() >= 2 => values.get(index).copied(),
            RuleValue::List(values) => values.first().copied(),
        }
    }
}

/// Interpreted quality rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityRule {
    /// Pixel value must equal this value
    Equals(f64),
    /// Pixel value must lie in `[min, max]`
    Range { min: f64, max: f64 },
    /// Neither one nor two values; carries the number of values given
    Malformed(usize),
}

impl QualityRule {
    /// Evaluate the rule for one value; NaN never passes
    pub fn accepts(&self, value: f64) -> bool {
        match *self {
            QualityRule::Equals(target) => value == target,
            QualityRule::Range { min, max } => value >= min && value <= max,
            QualityRule::Malformed(_) => true,
        }
    }
}

/// Field name to rule mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet(BTreeMap<String, RuleValue>);

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, field: impl Into<String>, min: f64, max: f64) -> Self {
        self.0.insert(field.into(), RuleValue::List(vec![min, max]));
        self
    }

    pub fn with_equals(mut self, field: impl Into<String>, value: f64) -> Self {
        self.0.insert(field.into(), RuleValue::List(vec![value]));
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: RuleValue) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<QualityRule> {
        self.0.get(field).map(RuleValue::to_rule)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, QualityRule)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.to_rule()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn raw(&self, field: &str) -> Option<&RuleValue> {
        self.0.get(field)
    }
}

/// Nearest-band extraction applied to every granule before the search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandExtract {
    pub field: String,
    pub wavelength: f64,
}

/// Largest accepted temporal half-window, one year in hours
pub const MAX_DELTA_HOUR: f64 = 8760.0;

/// Matchup parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchupConfig {
    /// Maximum site to pixel-centre distance, km
    pub search_center_radius: f64,
    /// Half-width of the aggregation window, pixels
    pub search_grid_delta: usize,
    /// Half-width of the temporal window, hours
    pub delta_hour: f64,
    /// Field whose valid-pixel count is reported as `count`
    pub reference_field: String,
    pub band_extracts: Vec<BandExtract>,
    #[serde(flatten)]
    pub rules: RuleSet,
}

impl Default for MatchupConfig {
    fn default() -> Self {
        Self {
            search_center_radius: 5.0,
            search_grid_delta: 5,
            delta_hour: 2.0,
            reference_field: "chi2".to_string(),
            band_extracts: Vec::new(),
            rules: RuleSet::new()
                .with_range("chi2", 0.0, 2.0)
                .with_range("nv_ref", 120.0, 170.0)
                .with_range("nv_dolp", 120.0, 170.0)
                .with_range("quality_flag", 0.0, 5.0),
        }
    }
}

impl MatchupConfig {
    pub fn from_json_str(json: &str) -> MatchupResult<Self> {
        let config: MatchupConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MatchupResult<Self> {
        log::info!("Reading matchup configuration: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> MatchupResult<()> {
        if !self.search_center_radius.is_finite() || self.search_center_radius < 0.0 {
            return Err(MatchupError::Config(format!(
                "search_center_radius must be a non-negative distance, got {}",
                self.search_center_radius
            )));
        }
        if !self.delta_hour.is_finite() || !(0.0..=MAX_DELTA_HOUR).contains(&self.delta_hour) {
            return Err(MatchupError::Config(format!(
                "delta_hour must be between 0 and {} hours, got {}",
                MAX_DELTA_HOUR, self.delta_hour
            )));
        }
        if self.reference_field.is_empty() {
            return Err(MatchupError::Config(
                "reference_field cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Compact tag of the configuration for output folder names,
    /// e.g. `c5.0_r5_h2.0_chi22.0_nvref120_nvdolp120_qf5`
    pub fn rules_tag(&self) -> String {
        let mut parts = vec![
            format!("c{:.1}", self.search_center_radius),
            format!("r{}", self.search_grid_delta),
            format!("h{:.1}", self.delta_hour),
        ];

        // (rule, value index, prefix, integer formatting)
        const KNOWN: [(&str, usize, &str, bool); 4] = [
            ("chi2", 1, "chi2", false),
            ("nv_ref", 0, "nvref", true),
            ("nv_dolp", 0, "nvdolp", true),
            ("quality_flag", 1, "qf", true),
        ];

        for (name, index, prefix, as_int) in KNOWN {
            if let Some(value) = self.rules.raw(name).and_then(|v| v.nth_or_first(index)) {
                if as_int {
                    parts.push(format!("{}{}", prefix, value as i64));
                } else {
                    parts.push(format!("{}{:.1}", prefix, value));
                }
            }
        }

        for (name, value) in self.rules.0.iter() {
            if KNOWN.iter().any(|(known, ..)| known == name) {
                continue;
            }
            if let Some(first) = value.first() {
                parts.push(format!("{}{}", name, first));
            }
        }

        parts.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_rules() {
        let json = r#"{"search_center_radius": 5, "search_grid_delta": 2, "delta_hour": 1,
                       "chi2": [0, 2], "quality_flag": [0], "bad": [1, 2, 3]}"#;
        let config = MatchupConfig::from_json_str(json).unwrap();

        assert_eq!(config.search_center_radius, 5.0);
        assert_eq!(config.search_grid_delta, 2);
        assert_eq!(config.delta_hour, 1.0);
        assert_eq!(config.reference_field, "chi2");
        assert_eq!(config.rules.len(), 3);
        assert_eq!(
            config.rules.get("chi2"),
            Some(QualityRule::Range { min: 0.0, max: 2.0 })
        );
        assert_eq!(config.rules.get("quality_flag"), Some(QualityRule::Equals(0.0)));
        assert_eq!(config.rules.get("bad"), Some(QualityRule::Malformed(3)));
    }

    #[test]
    fn test_missing_knobs_use_defaults() {
        let config = MatchupConfig::from_json_str(r#"{"chi2": 1}"#).unwrap();
        assert_eq!(config.search_grid_delta, 5);
        assert_eq!(config.rules.get("chi2"), Some(QualityRule::Equals(1.0)));
        assert!(config.rules.get("nv_ref").is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(MatchupConfig::from_json_str(r#"{"delta_hour": -1}"#).is_err());
        assert!(MatchupConfig::from_json_str(r#"{"delta_hour": 1e300}"#).is_err());
        assert!(MatchupConfig::from_json_str(r#"{"delta_hour": 8760}"#).is_ok());
        assert!(MatchupConfig::from_json_str(r#"{"chi2": "low"}"#).is_err());
    }

    #[test]
    fn test_rule_acceptance() {
        let range = QualityRule::Range { min: 0.0, max: 2.0 };
        assert!(range.accepts(0.0));
        assert!(range.accepts(2.0));
        assert!(!range.accepts(2.5));
        assert!(!range.accepts(f64::NAN));
        assert!(QualityRule::Equals(1.0).accepts(1.0));
        assert!(!QualityRule::Equals(1.0).accepts(f64::NAN));
    }

    #[test]
    fn test_rules_tag() {
        let config = MatchupConfig::default();
        assert_eq!(
            config.rules_tag(),
            "c5.0_r5_h2.0_chi22.0_nvref120_nvdolp120_qf5"
        );

        let config = MatchupConfig {
            rules: RuleSet::new().with_equals("flag", 1.0),
            ..MatchupConfig::default()
        };
        assert_eq!(config.rules_tag(), "c5.0_r5_h2.0_flag1");
    }
}

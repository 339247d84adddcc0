//! Severity classification
//!
//! Maps `(anomaly category, confidence)` to a severity tier using a
//! per-category threshold table loaded from configuration. Classification is
//! pure and monotonic: raising the confidence never lowers the tier.

use mv_common::events::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Threshold pair for one category
///
/// A category with neither threshold is informational and always classifies
/// as `Info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryThresholds {
    #[serde(default)]
    pub critical: Option<f64>,
    #[serde(default)]
    pub warning: Option<f64>,
}

impl CategoryThresholds {
    pub const INFORMATIONAL: CategoryThresholds = CategoryThresholds {
        critical: None,
        warning: None,
    };

    pub fn new(critical: f64, warning: f64) -> Self {
        Self {
            critical: Some(critical),
            warning: Some(warning),
        }
    }

    pub fn is_informational(&self) -> bool {
        self.critical.is_none() && self.warning.is_none()
    }
}

/// Category name -> thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    categories: HashMap<String, CategoryThresholds>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        let categories = [
            ("surgical_bleeding", CategoryThresholds::new(0.70, 0.40)),
            ("abnormal_movement", CategoryThresholds::new(0.85, 0.50)),
            ("depression_indicator", CategoryThresholds::new(0.80, 0.50)),
            ("anxiety_indicator", CategoryThresholds::new(0.80, 0.50)),
            ("trauma_indicator", CategoryThresholds::new(0.75, 0.45)),
            ("instrument_detected", CategoryThresholds::INFORMATIONAL),
            ("anatomical_structure", CategoryThresholds::INFORMATIONAL),
        ]
        .into_iter()
        .map(|(name, t)| (name.to_string(), t))
        .collect();

        Self { categories }
    }
}

impl ThresholdTable {
    pub fn new(categories: HashMap<String, CategoryThresholds>) -> Self {
        Self { categories }
    }

    pub fn get(&self, category: &str) -> Option<&CategoryThresholds> {
        self.categories.get(category)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Check every threshold lies in [0, 1]
    pub fn validate(&self) -> Result<(), String> {
        for (name, thresholds) in &self.categories {
            for (tier, value) in [("critical", thresholds.critical), ("warning", thresholds.warning)] {
                if let Some(v) = value {
                    if !(0.0..=1.0).contains(&v) {
                        return Err(format!(
                            "threshold {}.{} = {} is outside [0, 1]",
                            name, tier, v
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Classify one detection or indicator
    ///
    /// `confidence >= critical` is critical, else `confidence >= warning` is
    /// warning, else info. Unknown categories and NaN confidences are info.
    pub fn classify(&self, category: &str, confidence: f64) -> Severity {
        let Some(thresholds) = self.categories.get(category) else {
            return Severity::Info;
        };

        if thresholds.critical.is_some_and(|t| confidence >= t) {
            Severity::Critical
        } else if thresholds.warning.is_some_and(|t| confidence >= t) {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

//! Experimental feature switches.
//!
//! Features are an explicit value carried by the configuration and handed to
//! whatever needs them at construction time. There is no process-wide set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A feature that is off unless explicitly enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentalFeature {
    /// Show in-app messages carried by successful responses.
    InAppMessaging,
}

impl ExperimentalFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InAppMessaging => "in_app_messaging",
        }
    }
}

/// The set of enabled experimental features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentalFeatures(BTreeSet<ExperimentalFeature>);

impl ExperimentalFeatures {
    /// No features enabled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Builder-style enable.
    pub fn with(mut self, feature: ExperimentalFeature) -> Self {
        self.0.insert(feature);
        self
    }

    pub fn is_enabled(&self, feature: ExperimentalFeature) -> bool {
        self.0.contains(&feature)
    }
}

impl FromIterator<ExperimentalFeature> for ExperimentalFeatures {
    fn from_iter<I: IntoIterator<Item = ExperimentalFeature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

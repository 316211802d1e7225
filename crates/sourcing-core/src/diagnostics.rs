//! Request diagnostics
//!
//! The diagnostics column is a small set of known subsections plus an opaque
//! extension map. Merging is append-only: a completion merge must never
//! clobber the track decision written when the job started.

use serde::{Deserialize, Serialize};

use crate::track::TrackDecision;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_decision: Option<TrackDecision>,

    /// Orchestrator result summary, written on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<serde_json::Value>,

    /// Per-query discovery telemetry summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<serde_json::Value>,

    /// Error detail for failed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Anything callers or older writers stashed here.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Diagnostics {
    pub fn from_value(value: Option<&serde_json::Value>) -> Self {
        value
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Merge a patch into this record. Known subsections overwrite when the
    /// patch carries them, except `track_decision`, which is preserved once
    /// written. Extension keys union, patch winning on conflicts.
    pub fn merge(&mut self, patch: Diagnostics) {
        if self.track_decision.is_none() {
            self.track_decision = patch.track_decision;
        }
        if patch.orchestrator.is_some() {
            self.orchestrator = patch.orchestrator;
        }
        if patch.discovery.is_some() {
            self.discovery = patch.discovery;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        for (key, value) in patch.extra {
            self.extra.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackDecision;

    #[test]
    fn test_merge_preserves_track_decision() {
        let mut diagnostics = Diagnostics {
            track_decision: Some(TrackDecision::fallback("v3")),
            ..Diagnostics::default()
        };

        let mut patch = Diagnostics::default();
        patch.track_decision = Some({
            let mut other = TrackDecision::fallback("v9");
            other.confidence = 0.99;
            other
        });
        patch.orchestrator = Some(serde_json::json!({"resultCount": 100}));

        diagnostics.merge(patch);

        // The original decision survives; the orchestrator section lands.
        assert_eq!(diagnostics.track_decision.unwrap().classifier_version, "v3");
        assert_eq!(diagnostics.orchestrator.unwrap()["resultCount"], 100);
    }

    #[test]
    fn test_merge_fills_missing_track_decision() {
        let mut diagnostics = Diagnostics::default();
        let patch = Diagnostics {
            track_decision: Some(TrackDecision::fallback("v3")),
            ..Diagnostics::default()
        };
        diagnostics.merge(patch);
        assert!(diagnostics.track_decision.is_some());
    }

    #[test]
    fn test_round_trip_keeps_unknown_keys() {
        let raw = serde_json::json!({
            "trackDecision": null,
            "legacyField": {"kept": true}
        });
        let diagnostics = Diagnostics::from_value(Some(&raw));
        let back = diagnostics.to_value();
        assert_eq!(back["legacyField"]["kept"], true);
    }
}

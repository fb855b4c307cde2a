//! Causal/belief graph node and edge types (§3.2): a second graph, coupled to
//! the task DAG only through `source_action_id` references, that records the
//! evidence/hypothesis chain driving the Reflector's audit.

use serde::{Deserialize, Serialize};

/// The closed set of causal node variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalKind {
    KeyFact,
    Evidence,
    Hypothesis,
    Vulnerability,
    ConfirmedVulnerability,
    Flag,
}

/// One node in the causal graph. Fields not meaningful to a given variant
/// (e.g. `confidence` on a `KeyFact`) are simply left `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CausalNode {
    pub id: String,
    pub variant: CausalKind,
    pub description: String,
    /// Hypothesis confidence in `[0,1]`. Required to promote a Hypothesis to
    /// Vulnerability (C1 is about inbound edges, not this field, but drivers
    /// commonly carry the running confidence here too).
    #[serde(default)]
    pub confidence: Option<f64>,
    /// The Action node whose artifact substantiates this node (used by C2's
    /// validates-edge requirement for Vulnerability → ConfirmedVulnerability).
    #[serde(default)]
    pub source_action_id: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    pub created_at: u64,
}

/// A directed, labeled, confidence-weighted edge between two causal nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CausalEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub confidence: f64,
}

/// Relation vocabulary used by the reference drivers. Not exhaustively
/// enforced by the store (arbitrary strings are accepted per §6.2's "small
/// closed vocabulary, documented above" — the vocabulary is a driver-side
/// prompting concern, not a wire-format constraint the store must reject on).
pub const RELATION_SUPPORTS: &str = "supports";
pub const RELATION_CONTRADICTS: &str = "contradicts";
pub const RELATION_VALIDATES: &str = "validates";
pub const RELATION_EXPLOITS: &str = "exploits";

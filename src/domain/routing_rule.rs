//! [`RoutingRule`] and [`Connection`]: the content-based routing model
//! evaluated by [`crate::router::RouterHost`].

use serde::{Deserialize, Serialize};

use super::config_types::Priority;
use super::ids::ItemName;

/// What a matching rule does with the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Forward the envelope unchanged to each target.
    Send,
    /// Run a named transform, producing a derived envelope, then forward it.
    Transform,
    /// Do not forward; write a terminal trace row.
    ///
    /// Treated as a synonym of [`RuleAction::Delete`] per the open-question
    /// decision recorded in `DESIGN.md`: the source distinguishes them
    /// without a clear behavioral difference.
    Stop,
    /// Do not forward; write a terminal trace row. Synonym of [`RuleAction::Stop`].
    Delete,
}

impl RuleAction {
    /// True for the two actions that never forward an envelope.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RuleAction::Stop | RuleAction::Delete)
    }
}

/// One content-based routing rule owned by a [`crate::router::RouterHost`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Human-readable name, unique within the owning router.
    pub name: String,
    /// Evaluation order; lower runs first. Does not affect which targets
    /// are selected under all-match semantics, only trace/forward order.
    pub priority: Priority,
    /// Disabled rules are skipped entirely.
    pub enabled: bool,
    /// Boolean expression over field accessors; empty means always true.
    #[serde(default)]
    pub condition: String,
    /// What to do with envelopes this rule matches.
    pub action: RuleAction,
    /// Ordered forwarding targets.
    #[serde(default)]
    pub targets: Vec<ItemName>,
    /// Name of the transform to run, required when `action == Transform`.
    pub transform_name: Option<String>,
}

impl RoutingRule {
    /// True for a rule whose `condition` is empty (always matches).
    #[must_use]
    pub fn always_matches(&self) -> bool {
        self.condition.trim().is_empty()
    }

    /// True if this rule can never forward anywhere, e.g. `Send` with no
    /// targets, making evaluation of it a no-op beyond the trace row.
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        matches!(self.action, RuleAction::Send | RuleAction::Transform) && self.targets.is_empty()
    }
}

/// Edge kind in a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Normal forwarding path.
    Standard,
    /// Taken when the source reports a delivery failure.
    Error,
    /// Fire-and-forget; the source does not wait on this edge's outcome.
    Async,
}

/// A declarative edge used to compute a host's default target list when no
/// routing rule applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Upstream item name.
    pub source_item: ItemName,
    /// Downstream item name.
    pub target_item: ItemName,
    /// What kind of edge this is.
    pub kind: ConnectionKind,
}

//! [`ProductionSnapshot`]: the configuration wire shape `Engine::deploy`
//! and `Engine::reload` consume, matching SPEC_FULL.md §6's `{production,
//! items, connections, routing_rules}` JSON object verbatim.

use serde::{Deserialize, Serialize};

use crate::domain::{Connection, ItemConfig, ItemName, RoutingRule};

/// Top-level `production{...}` fields carried alongside the item/connection/
/// rule lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionSettings {
    /// Production display name.
    pub name: String,
    /// Whether the engine should deploy this production at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form production-level settings, not otherwise typed.
    #[serde(default)]
    pub settings: std::collections::HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// A full configuration snapshot: everything `Engine::deploy` needs to
/// build and wire a production's hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionSnapshot {
    /// Production-level metadata and settings.
    pub production: ProductionSettings,
    /// One entry per item (service/process/operation) in the production.
    pub items: Vec<ItemConfig>,
    /// Declarative edges used to compute default forwarding targets.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Content-based routing rules, grouped by the `process`-kind item
    /// that owns and evaluates them.
    #[serde(default)]
    pub routing_rules: Vec<RouterRuleSet>,
}

/// One `process`-kind item's routing rule table.
///
/// SPEC_FULL.md §6 names `routing_rules[]` as a flat list without saying
/// how a rule is tied to the router that evaluates it; grouping by owning
/// item (rather than adding an owner field to [`RoutingRule`] itself, which
/// every other consumer of that type treats as router-internal) keeps
/// [`RoutingRule`] free of a back-reference it has no other use for. See
/// `DESIGN.md` for this open-question decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRuleSet {
    /// The `process`-kind item these rules belong to.
    pub item: ItemName,
    /// Rules in load order (re-sorted by priority at [`crate::router::RouterHost`] construction).
    pub rules: Vec<RoutingRule>,
}

/// Errors raised validating a [`ProductionSnapshot`] before deploy.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// Two items declared the same name.
    #[error("duplicate item name: {0}")]
    DuplicateItemName(String),
    /// An item failed its own cross-field validation.
    #[error("item '{0}' is invalid: {1}")]
    InvalidItem(String, crate::domain::ItemConfigError),
    /// A connection referenced an item not present in `items`.
    #[error("connection references unknown item: {0}")]
    UnknownConnectionEndpoint(String),
    /// A routing rule targeted an item not present in `items`.
    #[error("routing rule '{0}' targets unknown item: {1}")]
    UnknownRuleTarget(String, String),
}

impl ProductionSnapshot {
    /// Validates item-name uniqueness, each item's own invariants, and that
    /// every connection/rule-target endpoint refers to a declared item.
    ///
    /// Condition *parseability* is deliberately not checked here: per
    /// SPEC_FULL.md §4.5/§9, a rule whose condition fails to parse is
    /// disabled rather than rejected at deploy time.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if !seen.insert(item.name.to_string()) {
                return Err(SnapshotError::DuplicateItemName(item.name.to_string()));
            }
            item.validate()
                .map_err(|err| SnapshotError::InvalidItem(item.name.to_string(), err))?;
        }
        for connection in &self.connections {
            if !seen.contains(&connection.source_item.to_string()) {
                return Err(SnapshotError::UnknownConnectionEndpoint(
                    connection.source_item.to_string(),
                ));
            }
            if !seen.contains(&connection.target_item.to_string()) {
                return Err(SnapshotError::UnknownConnectionEndpoint(
                    connection.target_item.to_string(),
                ));
            }
        }
        for rule_set in &self.routing_rules {
            if !seen.contains(&rule_set.item.to_string()) {
                return Err(SnapshotError::UnknownConnectionEndpoint(rule_set.item.to_string()));
            }
            for rule in &rule_set.rules {
                for target in &rule.targets {
                    if !seen.contains(&target.to_string()) {
                        return Err(SnapshotError::UnknownRuleTarget(
                            rule.name.clone(),
                            target.to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

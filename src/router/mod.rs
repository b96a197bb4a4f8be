//! [`RouterHost`]: a `process`-kind item that evaluates content-based
//! routing rules instead of speaking to any external transport.
//!
//! Rules are compiled once at construction into [`condition::Condition`]s
//! and forwarded through a [`TargetRegistry`] rather than owning the
//! targets directly, so a router never needs to know about the rest of the
//! production's topology.

pub mod condition;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::domain::{Direction, HeaderStatus, ItemName, MessageEnvelope, MessageHeader, RoutingRule, RuleAction};
use crate::hl7;
use crate::host::{Host, MessageHandler};
use crate::trace_store::{TraceStore, TraceWriter};

use condition::Condition;

/// How strictly a [`RouterHost`] enforces that an envelope parses before
/// rules are evaluated against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Never parse; every rule with a non-empty condition evaluates false.
    #[default]
    None,
    /// Parse, but evaluate rules even if parsing failed.
    Warn,
    /// Parse; a failure routes to the bad-message handler (or drops with an
    /// error trace) and skips rule evaluation entirely.
    Error,
}

/// A named in-process transform: takes an envelope and produces new raw
/// bytes for a derived envelope, per `RuleAction::Transform`.
pub type Transform = Arc<dyn Fn(&MessageEnvelope) -> Vec<u8> + Send + Sync>;

/// Looks up a live [`Host`] by item name so [`RouterHost`] can forward
/// without owning the whole engine.
///
/// Implemented by `crate::engine::ServiceRegistry`; kept as a narrow trait
/// here so this module does not depend on `crate::engine`.
pub trait TargetRegistry: Send + Sync {
    /// Resolves `name` to its live host, if deployed and not yet stopped.
    fn resolve(&self, name: &str) -> Option<Arc<Host>>;
}

/// A [`RoutingRule`] plus its parsed [`Condition`], or the parse error that
/// disabled it.
struct CompiledRule {
    rule: RoutingRule,
    condition: Result<Condition, condition::ConditionError>,
}

/// Fully determines one [`RouterHost`]'s behavior.
pub struct RouterConfig {
    /// This router's item name, used as `item_name` in trace headers.
    pub name: ItemName,
    /// Owning production.
    pub project_id: String,
    /// Rules to evaluate, in load order (sorted by priority at construction).
    pub rules: Vec<RoutingRule>,
    /// Fallback targets used when no rule matches and nothing is terminal.
    pub default_targets: Vec<ItemName>,
    /// How strictly envelopes are parsed before rule evaluation.
    pub validation_mode: ValidationMode,
    /// Item to forward structurally-invalid envelopes to in `Error` mode.
    pub bad_message_handler: Option<ItemName>,
    /// Named transforms available to `RuleAction::Transform` rules.
    pub transforms: HashMap<String, Transform>,
}

/// Counters surfaced through the engine's `item_metrics` endpoint, in
/// addition to the [`crate::host::HostMetrics`] every host already reports.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Envelopes for which no rule matched and no default target applied.
    pub no_match: AtomicU64,
    /// Envelopes dropped for failing to parse under `ValidationMode::Error`.
    pub parse_failures: AtomicU64,
    /// Rules disabled at load time because their condition failed to parse.
    pub disabled_rules: AtomicU64,
}

/// Content-based router: a `process`-kind item with no adapter of its own.
pub struct RouterHost {
    name: ItemName,
    project_id: String,
    rules: Vec<CompiledRule>,
    default_targets: Vec<ItemName>,
    validation_mode: ValidationMode,
    bad_message_handler: Option<ItemName>,
    transforms: HashMap<String, Transform>,
    registry: Arc<dyn TargetRegistry>,
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    metrics: Arc<RouterMetrics>,
}

impl RouterHost {
    /// Builds a router from `config`, compiling every rule's condition.
    ///
    /// A rule whose condition fails to parse is kept (so it still shows up
    /// in diagnostics) but is never matched, and
    /// [`RouterMetrics::disabled_rules`] is incremented instead of failing
    /// the whole deploy over one bad condition string.
    #[must_use]
    pub fn new(
        config: RouterConfig,
        registry: Arc<dyn TargetRegistry>,
        trace_store: Arc<dyn TraceStore>,
        trace_writer: Arc<TraceWriter>,
    ) -> Arc<Self> {
        let metrics = Arc::new(RouterMetrics::default());
        let mut rules: Vec<CompiledRule> = config
            .rules
            .into_iter()
            .map(|rule| {
                let condition = Condition::parse(&rule.condition);
                if condition.is_err() {
                    metrics.disabled_rules.fetch_add(1, Ordering::Relaxed);
                    warn!(rule = %rule.name, "routing rule condition failed to parse; rule disabled");
                }
                CompiledRule { rule, condition }
            })
            .collect();
        rules.sort_by_key(|c| c.rule.priority);

        Arc::new(Self {
            name: config.name,
            project_id: config.project_id,
            rules,
            default_targets: config.default_targets,
            validation_mode: config.validation_mode,
            bad_message_handler: config.bad_message_handler,
            transforms: config.transforms,
            registry,
            trace_store,
            trace_writer,
            metrics,
        })
    }

    /// Snapshot of this router's own counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Evaluates every enabled, successfully-compiled rule in priority
    /// order, forwarding as each matching rule directs.
    ///
    /// Returns the list of target item names actually forwarded to (for the
    /// trace row's `destination_item`) and whether a terminal (stop/delete)
    /// rule was hit.
    async fn evaluate(&self, envelope: &MessageEnvelope) -> (Vec<String>, bool) {
        let mut forwarded = Vec::new();
        let mut terminal_hit = false;

        for compiled in &self.rules {
            if !compiled.rule.enabled || compiled.rule.is_no_op() {
                continue;
            }
            let Ok(condition) = &compiled.condition else {
                continue;
            };
            if !condition.evaluate(envelope) {
                continue;
            }

            match compiled.rule.action {
                RuleAction::Send => {
                    for target in &compiled.rule.targets {
                        self.forward(envelope.addressed_to(target.as_ref()), target).await;
                        forwarded.push(target.to_string());
                    }
                }
                RuleAction::Transform => {
                    let transformed = compiled
                        .rule
                        .transform_name
                        .as_deref()
                        .and_then(|name| self.transforms.get(name))
                        .map(|transform| transform(envelope));
                    let Some(raw_payload) = transformed else {
                        warn!(rule = %compiled.rule.name, "transform rule has no resolvable transform; skipped");
                        continue;
                    };
                    let derived = envelope.derive(raw_payload);
                    for target in &compiled.rule.targets {
                        self.forward(derived.addressed_to(target.as_ref()), target).await;
                        forwarded.push(target.to_string());
                    }
                }
                RuleAction::Stop | RuleAction::Delete => {
                    terminal_hit = true;
                    break;
                }
            }
        }

        if forwarded.is_empty() && !terminal_hit && !self.default_targets.is_empty() {
            for target in &self.default_targets {
                self.forward(envelope.addressed_to(target.as_ref()), target).await;
                forwarded.push(target.to_string());
            }
        }

        (forwarded, terminal_hit)
    }

    async fn forward(&self, envelope: MessageEnvelope, target: &ItemName) {
        let Some(host) = self.registry.resolve(target.as_ref()) else {
            warn!(target = %target, "routing target not found");
            return;
        };
        if let Err(err) = host.submit(envelope).await {
            warn!(target = %target, error = %err, "failed to forward to routing target");
        }
    }

    /// Writes one inbound trace row for the router's own evaluation of
    /// `envelope`, with `destination_item` set to the comma-joined list of
    /// targets actually forwarded to (or left `None` on no-match/terminal).
    async fn record_trace(&self, envelope: &MessageEnvelope, forwarded: &[String], status: HeaderStatus) {
        let body_id = match self
            .trace_store
            .store_body(&envelope.raw_payload, &envelope.content_type, &envelope.schema_version)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "failed to store router trace body");
                return;
            }
        };
        let mut header = MessageHeader::new_pending(
            self.project_id.clone(),
            self.name.to_string(),
            "process",
            Direction::Inbound,
            Some(envelope.session_id),
            body_id,
            "HL7v2",
        );
        header.source_item = envelope.source_host.clone();
        header.destination_item = (!forwarded.is_empty()).then(|| forwarded.join(","));
        let header_id = header.header_id;
        self.trace_writer.record_header(header);
        self.trace_writer.finish_header(header_id, status, None, None);
    }
}

#[async_trait]
impl MessageHandler for RouterHost {
    #[instrument(skip(self, envelope), fields(item_name = %self.name, message_id = %envelope.message_id))]
    async fn on_message(&self, mut envelope: MessageEnvelope) -> Result<(), String> {
        if self.validation_mode != ValidationMode::None && envelope.parsed_view.is_none() {
            envelope.parsed_view = Some(hl7::parse(&envelope.raw_payload));
        }

        let structurally_valid = envelope
            .parsed_view
            .as_ref()
            .is_none_or(|view| hl7::message_type(view).is_some());

        if self.validation_mode == ValidationMode::Error && !structurally_valid {
            self.metrics.parse_failures.fetch_add(1, Ordering::Relaxed);
            if let Some(handler) = self.bad_message_handler.clone() {
                self.forward(envelope.clone(), &handler).await;
            } else {
                self.record_trace(&envelope, &[], HeaderStatus::Error).await;
            }
            debug!("envelope failed structural validation; routed to bad message handler");
            return Ok(());
        }

        let (forwarded, terminal_hit) = self.evaluate(&envelope).await;

        let status = if forwarded.is_empty() && !terminal_hit {
            self.metrics.no_match.fetch_add(1, Ordering::Relaxed);
            HeaderStatus::NoMatch
        } else {
            HeaderStatus::Completed
        };

        self.record_trace(&envelope, &forwarded, status).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HostSettings, Priority};
    use crate::trace_store::memory::MemoryTraceStore;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as TokioMutex;

    struct CapturingHandler {
        received: Arc<TokioMutex<Vec<MessageEnvelope>>>,
    }

    #[async_trait]
    impl MessageHandler for CapturingHandler {
        async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), String> {
            self.received.lock().await.push(envelope);
            Ok(())
        }
    }

    struct FakeRegistry {
        hosts: StdHashMap<String, Arc<Host>>,
    }

    impl TargetRegistry for FakeRegistry {
        fn resolve(&self, name: &str) -> Option<Arc<Host>> {
            self.hosts.get(name).cloned()
        }
    }

    async fn target_host(name: &str, received: Arc<TokioMutex<Vec<MessageEnvelope>>>) -> Arc<Host> {
        let item_name = ItemName::try_from(name.to_string()).unwrap();
        let handler = Arc::new(CapturingHandler { received });
        let store = MemoryTraceStore::new();
        let host = Host::new(item_name, "proj", "operation", HostSettings::default(), handler, store);
        host.start().await.unwrap();
        host
    }

    fn adt_envelope(msg_type: &str, trigger: &str) -> MessageEnvelope {
        let raw = format!("MSH|^~\\&|A|B|C|D|20260101||{msg_type}^{trigger}|MSG1|P|2.4\r");
        MessageEnvelope::new_inbound("application/hl7-v2+er7", "2.4", raw.into_bytes())
    }

    fn rule(name: &str, priority: u8, condition: &str, action: RuleAction, targets: &[&str]) -> RoutingRule {
        RoutingRule {
            name: name.to_string(),
            priority: Priority::try_from(priority).unwrap(),
            enabled: true,
            condition: condition.to_string(),
            action,
            targets: targets.iter().map(|t| ItemName::try_from((*t).to_string()).unwrap()).collect(),
            transform_name: None,
        }
    }

    async fn build_router(
        rules: Vec<RoutingRule>,
        default_targets: Vec<&str>,
        validation_mode: ValidationMode,
        hosts: StdHashMap<String, Arc<Host>>,
    ) -> (Arc<RouterHost>, Arc<dyn TraceStore>) {
        let trace_store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let trace_writer = TraceWriter::spawn(Arc::clone(&trace_store), 16);
        let registry = Arc::new(FakeRegistry { hosts });
        let config = RouterConfig {
            name: ItemName::try_from("Router".to_string()).unwrap(),
            project_id: "proj".to_string(),
            rules,
            default_targets: default_targets
                .into_iter()
                .map(|t| ItemName::try_from(t.to_string()).unwrap())
                .collect(),
            validation_mode,
            bad_message_handler: None,
            transforms: StdHashMap::new(),
        };
        let router = RouterHost::new(config, registry, Arc::clone(&trace_store), trace_writer);
        (router, trace_store)
    }

    #[tokio::test]
    async fn all_matching_rules_forward_to_their_targets() {
        let received_a = Arc::new(TokioMutex::new(Vec::new()));
        let received_b = Arc::new(TokioMutex::new(Vec::new()));
        let mut hosts = StdHashMap::new();
        hosts.insert("A-Out".to_string(), target_host("A-Out", Arc::clone(&received_a)).await);
        hosts.insert("B-Out".to_string(), target_host("B-Out", Arc::clone(&received_b)).await);

        let rules = vec![
            rule("to-a", 1, r#"{MSH-9.1}="ADT""#, RuleAction::Send, &["A-Out"]),
            rule("to-b", 2, r#"{MSH-9.2}="A01""#, RuleAction::Send, &["B-Out"]),
        ];
        let (router, _store) = build_router(rules, vec![], ValidationMode::Warn, hosts).await;

        router.on_message(adt_envelope("ADT", "A01")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(received_a.lock().await.len(), 1);
        assert_eq!(received_b.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn no_match_falls_back_to_default_targets() {
        let received = Arc::new(TokioMutex::new(Vec::new()));
        let mut hosts = StdHashMap::new();
        hosts.insert("Fallback".to_string(), target_host("Fallback", Arc::clone(&received)).await);

        let rules = vec![rule("only-orm", 1, r#"{MSH-9.1}="ORM""#, RuleAction::Send, &["Fallback"])];
        let (router, store) = build_router(rules, vec!["Fallback"], ValidationMode::Warn, hosts).await;

        router.on_message(adt_envelope("ADT", "A01")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(received.lock().await.len(), 1);
        let headers = store
            .list_headers(crate::trace_store::HeaderFilter::default())
            .await
            .unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].status, HeaderStatus::Completed);
    }

    #[tokio::test]
    async fn stop_action_halts_evaluation_and_forwards_nothing() {
        let received = Arc::new(TokioMutex::new(Vec::new()));
        let mut hosts = StdHashMap::new();
        hosts.insert("Out".to_string(), target_host("Out", Arc::clone(&received)).await);

        let rules = vec![
            rule("halt", 1, r#"{MSH-9.1}="ADT""#, RuleAction::Stop, &[]),
            rule("would-match-too", 2, r#"{MSH-9.1}="ADT""#, RuleAction::Send, &["Out"]),
        ];
        let (router, store) = build_router(rules, vec!["Out"], ValidationMode::Warn, hosts).await;

        router.on_message(adt_envelope("ADT", "A01")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(received.lock().await.is_empty());
        let headers = store
            .list_headers(crate::trace_store::HeaderFilter::default())
            .await
            .unwrap();
        assert_eq!(headers[0].status, HeaderStatus::Completed);
        assert!(headers[0].destination_item.is_none());
    }

    #[tokio::test]
    async fn disabled_rule_never_matches() {
        let received = Arc::new(TokioMutex::new(Vec::new()));
        let mut hosts = StdHashMap::new();
        hosts.insert("Out".to_string(), target_host("Out", Arc::clone(&received)).await);

        let mut disabled = rule("disabled", 1, r#"{MSH-9.1}="ADT""#, RuleAction::Send, &["Out"]);
        disabled.enabled = false;
        let (router, _store) = build_router(vec![disabled], vec![], ValidationMode::Warn, hosts).await;

        router.on_message(adt_envelope("ADT", "A01")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(received.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unparseable_condition_disables_only_that_rule() {
        let received = Arc::new(TokioMutex::new(Vec::new()));
        let mut hosts = StdHashMap::new();
        hosts.insert("Out".to_string(), target_host("Out", Arc::clone(&received)).await);

        let rules = vec![rule("broken", 1, "{MSH-9.1} =", RuleAction::Send, &["Out"])];
        let (router, _store) = build_router(rules, vec![], ValidationMode::Warn, hosts).await;
        assert_eq!(router.metrics().disabled_rules.load(Ordering::Relaxed), 1);

        router.on_message(adt_envelope("ADT", "A01")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(received.lock().await.is_empty());
    }
}

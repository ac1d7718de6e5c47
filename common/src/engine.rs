use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::TwinConfig,
    registry::{HandlerRegistry, RegistryFull},
    report::{ReportQueue, ReportedProperty},
    stats::TwinStats,
    twin::{DesiredProperty, TwinDocument, TwinParseError},
    types::{Handler, HandlerOutcome, InboundMessage, TwinUpdateKind},
};

/// Twin synchronization and command dispatch.
///
/// Owns the two handler registries, the deferred report queue and the
/// counters. Handlers are registered during startup through `&mut self`;
/// afterwards the engine is shared immutably (typically behind an `Arc`)
/// between the transport callback context, which feeds `process`, and the
/// consumer loop, which drains `report_queue`. The queue is the only state
/// those two touch concurrently.
///
/// Handlers run synchronously inside `process` and must not post another
/// twin update back into the engine from within the callback.
pub struct TwinEngine {
    commands: HandlerRegistry,
    desired: HandlerRegistry,
    reports: ReportQueue,
    stats: TwinStats,
}

impl TwinEngine {
    pub fn new(mut config: TwinConfig) -> Self {
        config.sanitize();
        Self {
            commands: HandlerRegistry::with_capacity(config.command_capacity),
            desired: HandlerRegistry::with_capacity(config.desired_capacity),
            reports: ReportQueue::with_capacity(config.report_queue_capacity),
            stats: TwinStats::default(),
        }
    }

    /// Registers a handler for inbound commands, covering both
    /// cloud-to-device messages and direct method invocations.
    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        handler: Handler,
    ) -> Result<(), RegistryFull> {
        self.commands.register(name, handler)
    }

    /// Registers a handler fired when the named desired property changes.
    pub fn register_desired_property(
        &mut self,
        name: impl Into<String>,
        handler: Handler,
    ) -> Result<(), RegistryFull> {
        self.desired.register(name, handler)
    }

    pub fn report_queue(&self) -> &ReportQueue {
        &self.reports
    }

    pub fn stats(&self) -> &TwinStats {
        &self.stats
    }

    /// Single entry point for the transport adapter. Only a direct method
    /// produces an outcome for the caller.
    pub fn process(
        &self,
        message: InboundMessage,
    ) -> Result<Option<HandlerOutcome>, TwinParseError> {
        match message {
            InboundMessage::TwinUpdate { kind, document } => {
                self.handle_twin_update(kind, &document)?;
                Ok(None)
            }
            InboundMessage::DirectMethod { name, payload } => {
                Ok(self.handle_direct_method(&name, payload.as_ref()))
            }
            InboundMessage::CloudMessage { document } => {
                self.handle_cloud_message(&document);
                Ok(None)
            }
        }
    }

    /// Dispatches a direct method and returns its outcome, or `None` when no
    /// handler matches the name.
    pub fn handle_direct_method(
        &self,
        name: &str,
        payload: Option<&Value>,
    ) -> Option<HandlerOutcome> {
        match self.commands.lookup(name) {
            Some(entry) => {
                debug!("direct method {name} dispatched");
                Some(entry.invoke(payload))
            }
            None => {
                self.stats.record_unmatched();
                debug!("direct method {name} has no registered handler");
                None
            }
        }
    }

    /// Dispatches a cloud-to-device message of the shape
    /// `{"methodName": "...", "payload": {...}}`. Fire-and-forget: the
    /// handler outcome is discarded.
    pub fn handle_cloud_message(&self, document: &Value) {
        let Some(name) = document.get("methodName").and_then(Value::as_str) else {
            self.stats.record_unmatched();
            warn!("cloud message without a methodName field dropped");
            return;
        };

        match self.commands.lookup(name) {
            Some(entry) => {
                debug!("cloud message {name} dispatched");
                let _ = entry.invoke(document.get("payload"));
            }
            None => {
                self.stats.record_unmatched();
                debug!("cloud message {name} has no registered handler");
            }
        }
    }

    /// Reconciles a twin delivery and returns how many desired-property
    /// handlers fired.
    ///
    /// A partial delta carries no prior state, so every property in it is
    /// treated as changed. A full snapshot additionally carries the
    /// previously reported values; a desired property whose value matches
    /// its reported counterpart has already been applied and is skipped,
    /// which collapses the duplicate deliveries of a reconnect resync.
    pub fn handle_twin_update(
        &self,
        kind: TwinUpdateKind,
        document: &Value,
    ) -> Result<usize, TwinParseError> {
        let twin = TwinDocument::parse(kind, document)?;

        let mut fired = 0;
        for property in twin.desired() {
            if twin.is_converged(property) {
                debug!(
                    "desired property {} already matches reported state",
                    property.name
                );
                continue;
            }
            if self.apply_desired(property) {
                fired += 1;
            }
        }
        Ok(fired)
    }

    fn apply_desired(&self, property: &DesiredProperty) -> bool {
        let Some(entry) = self.desired.lookup(&property.name) else {
            self.stats.record_unmatched();
            debug!(
                "desired property {} has no registered handler",
                property.name
            );
            return false;
        };

        let outcome = entry.invoke(Some(&property.value));
        self.stats.record_desired_handled();

        let envelope = ReportedProperty {
            name: property.name.clone(),
            value: property.value.clone(),
            desired_version: property.version,
            status: outcome.status_text().to_string(),
            status_code: outcome.status_code,
        };
        if let Err(err) = self.reports.push(envelope) {
            self.stats.record_report_failure();
            warn!(
                "report queue full; dropping echo for {}",
                err.envelope.name
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn completed() -> Handler {
        Box::new(|_| HandlerOutcome::completed())
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Handler {
        let calls = Arc::clone(calls);
        Box::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            HandlerOutcome::completed()
        })
    }

    #[test]
    fn partial_update_produces_one_envelope_per_property() {
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_desired_property("fanSpeed", completed())
            .unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Partial,
                &json!({"fanSpeed": {"value": "3", "$version": 7}}),
            )
            .unwrap();

        assert_eq!(fired, 1);
        let envelope = engine.report_queue().pop().unwrap();
        assert_eq!(
            envelope,
            ReportedProperty {
                name: "fanSpeed".to_string(),
                value: json!("3"),
                desired_version: 7,
                status: "completed".to_string(),
                status_code: 200,
            }
        );
        assert!(engine.report_queue().is_empty());
        assert_eq!(engine.stats().snapshot().desired_handled, 1);
    }

    #[test]
    fn partial_update_fires_every_registered_key_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_desired_property("setVoltage", counting(&calls))
            .unwrap();
        engine
            .register_desired_property("setCurrent", counting(&calls))
            .unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Partial,
                &json!({
                    "setVoltage": {"value": "220"},
                    "setCurrent": {"value": "5"},
                    "$version": 3,
                }),
            )
            .unwrap();

        assert_eq!(fired, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.report_queue().len(), 2);
    }

    #[test]
    fn full_twin_skips_converged_properties() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_desired_property("x", counting(&calls))
            .unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Full,
                &json!({
                    "desired": {"x": {"value": "1"}, "$version": 2},
                    "reported": {"x": {"value": "1"}},
                }),
            )
            .unwrap();
        assert_eq!(fired, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(engine.report_queue().is_empty());

        // A diverged reported value re-triggers the handler.
        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Full,
                &json!({
                    "desired": {"x": {"value": "1"}, "$version": 2},
                    "reported": {"x": {"value": "0"}},
                }),
            )
            .unwrap();
        assert_eq!(fired, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let envelope = engine.report_queue().pop().unwrap();
        assert_eq!(envelope.name, "x");
        assert_eq!(envelope.desired_version, 2);
    }

    #[test]
    fn full_twin_fires_properties_absent_from_reported() {
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_desired_property("activateIR", completed())
            .unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Full,
                &json!({
                    "desired": {"activateIR": {"value": true}, "$version": 11},
                    "reported": {"somethingElse": {"value": 1}},
                }),
            )
            .unwrap();

        assert_eq!(fired, 1);
        assert_eq!(engine.report_queue().pop().unwrap().desired_version, 11);
    }

    #[test]
    fn unmatched_desired_property_is_a_counted_noop() {
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_desired_property("fanSpeed", completed())
            .unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Partial,
                &json!({"unknown": {"value": 1}, "$version": 5}),
            )
            .unwrap();

        assert_eq!(fired, 0);
        assert!(engine.report_queue().is_empty());
        let snapshot = engine.stats().snapshot();
        assert_eq!(snapshot.unmatched, 1);
        assert_eq!(snapshot.desired_handled, 0);
    }

    #[test]
    fn desired_dispatch_is_case_insensitive() {
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_desired_property("SetVoltage", completed())
            .unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Partial,
                &json!({"setvoltage": {"value": "110"}, "$version": 1}),
            )
            .unwrap();

        assert_eq!(fired, 1);
        assert_eq!(engine.report_queue().pop().unwrap().name, "setvoltage");
    }

    #[test]
    fn queue_overflow_is_counted_not_fatal() {
        let mut engine = TwinEngine::new(TwinConfig {
            report_queue_capacity: 2,
            ..TwinConfig::default()
        });
        engine.register_desired_property("a", completed()).unwrap();
        engine.register_desired_property("b", completed()).unwrap();
        engine.register_desired_property("c", completed()).unwrap();

        let fired = engine
            .handle_twin_update(
                TwinUpdateKind::Partial,
                &json!({
                    "a": {"value": 1},
                    "b": {"value": 2},
                    "c": {"value": 3},
                    "$version": 1,
                }),
            )
            .unwrap();

        assert_eq!(fired, 3);
        assert_eq!(engine.report_queue().len(), 2);
        let snapshot = engine.stats().snapshot();
        assert_eq!(snapshot.desired_handled, 3);
        assert_eq!(snapshot.report_failures, 1);
    }

    #[test]
    fn direct_method_returns_handler_outcome() {
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine
            .register_command(
                "rainbow",
                Box::new(|payload| {
                    let cycles = payload
                        .and_then(|p| p.get("cycles"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    HandlerOutcome::new(200, format!("cycled {cycles}"))
                }),
            )
            .unwrap();

        let outcome = engine
            .handle_direct_method("Rainbow", Some(&json!({"cycles": 3})))
            .unwrap();
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.response.as_deref(), Some("cycled 3"));

        assert!(engine.handle_direct_method("reboot", None).is_none());
        assert_eq!(engine.stats().snapshot().unmatched, 1);
    }

    #[test]
    fn cloud_message_routes_by_method_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine.register_command("message", counting(&calls)).unwrap();

        engine.handle_cloud_message(&json!({
            "methodName": "message",
            "payload": {"text": "hello"},
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Unknown method and malformed message are dropped, counted.
        engine.handle_cloud_message(&json!({"methodName": "nope"}));
        engine.handle_cloud_message(&json!({"payload": {}}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().snapshot().unmatched, 2);
    }

    #[test]
    fn process_routes_typed_messages() {
        let mut engine = TwinEngine::new(TwinConfig::default());
        engine.register_command("message", completed()).unwrap();
        engine
            .register_desired_property("fanSpeed", completed())
            .unwrap();

        let outcome = engine
            .process(InboundMessage::DirectMethod {
                name: "message".to_string(),
                payload: None,
            })
            .unwrap();
        assert_eq!(outcome, Some(HandlerOutcome::completed()));

        let outcome = engine
            .process(InboundMessage::TwinUpdate {
                kind: TwinUpdateKind::Partial,
                document: json!({"fanSpeed": {"value": "2"}, "$version": 1}),
            })
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(engine.report_queue().len(), 1);

        let err = engine
            .process(InboundMessage::TwinUpdate {
                kind: TwinUpdateKind::Full,
                document: json!([1, 2, 3]),
            })
            .unwrap_err();
        assert_eq!(err, TwinParseError::NotAnObject);
    }
}

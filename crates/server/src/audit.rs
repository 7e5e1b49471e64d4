use std::collections::BTreeMap;

use approvey_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Audit trail written into the structured log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let proposal_id = event.proposal_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let metadata = render_metadata(&event.metadata);

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                proposal_id = %proposal_id,
                category = ?event.category,
                actor = %event.actor,
                metadata = %metadata,
                "audit"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                proposal_id = %proposal_id,
                category = ?event.category,
                actor = %event.actor,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit"
            ),
        }
    }
}

fn render_metadata(metadata: &BTreeMap<String, String>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use approvey_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};

    use super::{render_metadata, TracingAuditSink};

    #[test]
    fn metadata_renders_as_sorted_json_object() {
        let mut metadata = BTreeMap::new();
        metadata.insert("step_id".to_string(), "APS-1".to_string());
        metadata.insert("reason".to_string(), "token mismatch".to_string());

        assert_eq!(
            render_metadata(&metadata),
            r#"{"reason":"token mismatch","step_id":"APS-1"}"#
        );
        assert_eq!(render_metadata(&BTreeMap::new()), "{}");
    }

    #[test]
    fn emitting_without_a_subscriber_is_a_no_op() {
        TracingAuditSink.emit(AuditEvent::new(
            None,
            "dispatch-test",
            "approval.link_refused",
            AuditCategory::Approval,
            "a@gsa.gov",
            AuditOutcome::Rejected,
        ));
    }
}

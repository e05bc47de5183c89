//! Projection of store events into the report records tenants receive.

use courier_store::{EventType, UnreportedEvent};
use serde_json::{Value, json};

/// Project one unreported event into its wire record.
#[must_use]
pub fn event_to_payload(event: &UnreportedEvent) -> Value {
    match event.event_type {
        EventType::Sent => json!({
            "id": event.message_id,
            "account_id": event.account_id,
            "sent_ts": event.event_ts,
        }),
        EventType::Error => json!({
            "id": event.message_id,
            "account_id": event.account_id,
            "error_ts": event.event_ts,
            "error": event.description,
        }),
        EventType::Deferred => json!({
            "id": event.message_id,
            "deferred_ts": event.event_ts,
            "deferred_reason": event.description,
        }),
        EventType::Bounce => {
            let metadata = event.metadata.as_ref();
            json!({
                "id": event.message_id,
                "bounce_ts": event.event_ts,
                "bounce_type": metadata.and_then(|m| m.get("bounce_type")).cloned(),
                "bounce_code": metadata.and_then(|m| m.get("bounce_code")).cloned(),
                "bounce_reason": event.description,
            })
        }
        EventType::PecAcceptance | EventType::PecDelivery | EventType::PecFailure => json!({
            "id": event.message_id,
            "pec_event": event.event_type.as_str(),
            "pec_ts": event.event_ts,
            "pec_details": event.description,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType) -> UnreportedEvent {
        UnreportedEvent {
            event_id: 1,
            message_pk: "pk1".to_string(),
            message_id: "m1".to_string(),
            tenant_id: "t1".to_string(),
            account_id: "a1".to_string(),
            event_type,
            event_ts: 1_234_567_890,
            description: None,
            metadata: None,
        }
    }

    #[test]
    fn test_sent_payload() {
        let payload = event_to_payload(&event(EventType::Sent));
        assert_eq!(payload["id"], "m1");
        assert_eq!(payload["account_id"], "a1");
        assert_eq!(payload["sent_ts"], 1_234_567_890);
    }

    #[test]
    fn test_error_payload() {
        let mut e = event(EventType::Error);
        e.description = Some("Connection refused".to_string());
        let payload = event_to_payload(&e);
        assert_eq!(payload["error_ts"], 1_234_567_890);
        assert_eq!(payload["error"], "Connection refused");
    }

    #[test]
    fn test_deferred_payload() {
        let mut e = event(EventType::Deferred);
        e.description = Some("Rate limited".to_string());
        let payload = event_to_payload(&e);
        assert_eq!(payload["deferred_ts"], 1_234_567_890);
        assert_eq!(payload["deferred_reason"], "Rate limited");
    }

    #[test]
    fn test_bounce_payload() {
        let mut e = event(EventType::Bounce);
        e.description = Some("User unknown".to_string());
        e.metadata = Some(serde_json::json!({
            "bounce_type": "hard",
            "bounce_code": "550",
        }));
        let payload = event_to_payload(&e);
        assert_eq!(payload["bounce_ts"], 1_234_567_890);
        assert_eq!(payload["bounce_type"], "hard");
        assert_eq!(payload["bounce_code"], "550");
        assert_eq!(payload["bounce_reason"], "User unknown");
    }

    #[test]
    fn test_pec_payload() {
        let mut e = event(EventType::PecAcceptance);
        e.description = Some("PEC accepted".to_string());
        let payload = event_to_payload(&e);
        assert_eq!(payload["pec_event"], "pec_acceptance");
        assert_eq!(payload["pec_ts"], 1_234_567_890);
        assert_eq!(payload["pec_details"], "PEC accepted");
    }
}

//! inbound settlement webhooks
//!
//! deliveries are authenticated with an hmac-sha256 signature over the
//! raw body before anything in the payload is trusted, then decoded into
//! a tagged event. redelivery is expected: handlers key idempotency off
//! the order reference carried in the event.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::errors::{LendingError, Result};

type HmacSha256 = Hmac<Sha256>;

const EVENT_CAPTURED: &str = "payment.captured";
const EVENT_FAILED: &str = "payment.failed";

/// settlement outcome decoded from a verified webhook body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentCaptured { order_ref: String },
    PaymentFailed { order_ref: String },
}

impl WebhookEvent {
    pub fn order_ref(&self) -> &str {
        match self {
            WebhookEvent::PaymentCaptured { order_ref } => order_ref,
            WebhookEvent::PaymentFailed { order_ref } => order_ref,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: PaymentWrapper,
}

#[derive(Debug, Deserialize)]
struct PaymentWrapper {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    order_id: String,
    status: String,
}

/// hex hmac-sha256 of `body` under the gateway's shared secret
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// check a delivery signature; comparison is constant-time
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(body);
    match hex::decode(signature) {
        Ok(expected) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

/// decode a verified body into a [`WebhookEvent`]
///
/// every field is validated before use: unknown event kinds, a missing
/// order reference, or an entity status that contradicts the event kind
/// all reject the delivery
pub fn decode_event(body: &[u8]) -> Result<WebhookEvent> {
    let parsed: WebhookBody = serde_json::from_slice(body)
        .map_err(|e| LendingError::validation(format!("malformed webhook body: {e}")))?;

    let entity = parsed.payload.payment.entity;
    if entity.order_id.is_empty() {
        return Err(LendingError::validation(
            "webhook delivery carries no order reference",
        ));
    }

    match parsed.event.as_str() {
        EVENT_CAPTURED => {
            if entity.status != "captured" {
                return Err(LendingError::validation(format!(
                    "capture event with payment status '{}'",
                    entity.status
                )));
            }
            Ok(WebhookEvent::PaymentCaptured {
                order_ref: entity.order_id,
            })
        }
        EVENT_FAILED => Ok(WebhookEvent::PaymentFailed {
            order_ref: entity.order_id,
        }),
        other => Err(LendingError::validation(format!(
            "unsupported webhook event '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured_body(order_ref: &str) -> Vec<u8> {
        format!(
            r#"{{"event":"payment.captured","payload":{{"payment":{{"entity":{{"order_id":"{order_ref}","status":"captured"}}}}}}}}"#
        )
        .into_bytes()
    }

    #[test]
    fn signature_round_trip() {
        let body = captured_body("order_000001");
        let signature = compute_signature("secret", &body);

        assert!(verify_signature("secret", &body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = captured_body("order_000001");
        let signature = compute_signature("secret", &body);

        assert!(!verify_signature("secret", b"something else", &signature));
        assert!(!verify_signature("other secret", &body, &signature));
        assert!(!verify_signature("secret", &body, "not-hex"));
    }

    #[test]
    fn decodes_captured_payments() {
        let event = decode_event(&captured_body("order_000007")).unwrap();

        assert_eq!(
            event,
            WebhookEvent::PaymentCaptured {
                order_ref: "order_000007".to_string()
            }
        );
        assert_eq!(event.order_ref(), "order_000007");
    }

    #[test]
    fn decodes_failed_payments() {
        let body = br#"{"event":"payment.failed","payload":{"payment":{"entity":{"order_id":"order_000009","status":"failed"}}}}"#;

        let event = decode_event(body).unwrap();

        assert_eq!(
            event,
            WebhookEvent::PaymentFailed {
                order_ref: "order_000009".to_string()
            }
        );
    }

    #[test]
    fn unknown_event_kinds_are_rejected() {
        let body = br#"{"event":"refund.processed","payload":{"payment":{"entity":{"order_id":"order_000001","status":"captured"}}}}"#;

        assert!(matches!(
            decode_event(body),
            Err(LendingError::Validation { .. })
        ));
    }

    #[test]
    fn capture_event_with_contradicting_status_is_rejected() {
        let body = br#"{"event":"payment.captured","payload":{"payment":{"entity":{"order_id":"order_000001","status":"authorized"}}}}"#;

        assert!(decode_event(body).is_err());
    }

    #[test]
    fn missing_order_reference_is_rejected() {
        let body = br#"{"event":"payment.captured","payload":{"payment":{"entity":{"order_id":"","status":"captured"}}}}"#;

        assert!(decode_event(body).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(decode_event(b"{not json").is_err());
    }
}

// relia-gateway/tests/outbox.rs
// ============================================================================
// Module: Outbox Worker Tests
// Description: Delivery, retry backoff, reconciliation, and poison pills.
// ============================================================================
//! ## Overview
//! Exercises one worker pass at a time with a scripted poster: failed posts
//! back off and stay pending, successes stamp the approval with the chat
//! message timestamp, already-stamped approvals reconcile without posting,
//! and undecodable payloads terminate instead of blocking the queue.

use std::sync::Arc;
use std::sync::Mutex;

use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use relia_core::ApprovalId;
use relia_core::ApprovalRow;
use relia_core::ApprovalStatus;
use relia_core::IdemKey;
use relia_core::Ledger;
use relia_core::MemoryLedger;
use relia_core::OutboxRow;
use relia_core::OutboxStatus;
use relia_gateway::outbox::next_attempt_delay;
use relia_gateway::outbox::process_outbox_due;
use relia_gateway::slack::ApprovalMessage;
use relia_gateway::slack::ChatPoster;
use relia_gateway::slack::NotifyError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Poster failing the first `fail` calls, then succeeding.
struct FlakyPoster {
    calls: Mutex<u32>,
    fail: u32,
}

impl FlakyPoster {
    fn new(fail: u32) -> Self {
        Self {
            calls: Mutex::new(0),
            fail,
        }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl ChatPoster for FlakyPoster {
    fn post_approval(
        &self,
        _channel: &str,
        _message: &ApprovalMessage,
    ) -> Result<String, NotifyError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls <= self.fail {
            return Err(NotifyError::Post("rate_limited".to_string()));
        }
        Ok("1700000000.1234".to_string())
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::parse("2025-12-20T00:00:00Z", &Rfc3339).unwrap()
}

fn format(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap()
}

fn ledger_with_pending(message_json: Vec<u8>) -> Arc<dyn Ledger> {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let created = format(now());

    ledger
        .put_approval(&ApprovalRow {
            approval_id: ApprovalId::new("a1"),
            idem_key: IdemKey::new("idem1"),
            status: ApprovalStatus::Pending,
            slack_channel: None,
            slack_msg_ts: None,
            approved_by: None,
            approved_at: None,
            created_at: created.clone(),
            updated_at: created.clone(),
        })
        .unwrap();

    ledger
        .put_outbox(&OutboxRow {
            notification_id: "slack:a1".to_string(),
            approval_id: ApprovalId::new("a1"),
            channel: "C1".to_string(),
            message_json,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            next_attempt_at: created.clone(),
            last_error: None,
            sent_at: None,
            created_at: created.clone(),
            updated_at: created,
        })
        .unwrap();

    ledger
}

fn valid_message() -> Vec<u8> {
    serde_json::to_vec(&ApprovalMessage {
        approval_id: "a1".to_string(),
        action: "terraform.apply".to_string(),
        resource: "res".to_string(),
        env: "prod".to_string(),
        risk: Some("high".to_string()),
        reason: None,
        requested_by: None,
    })
    .unwrap()
}

// ============================================================================
// SECTION: Delivery and Retry
// ============================================================================

/// Tests a failed post backing off, then a later pass delivering.
#[test]
fn test_retry_then_success() {
    let ledger = ledger_with_pending(valid_message());
    let poster = FlakyPoster::new(1);

    let processed = process_outbox_due(&ledger, &poster, now(), 10).unwrap();
    assert_eq!(processed, 1);

    let after_fail = ledger.get_outbox("slack:a1").unwrap().unwrap();
    assert_eq!(after_fail.status, OutboxStatus::Pending);
    assert_eq!(after_fail.attempt_count, 1);
    assert!(after_fail.last_error.is_some());
    assert_eq!(
        after_fail.next_attempt_at,
        format(now() + Duration::seconds(5))
    );

    // Not due yet: nothing happens.
    let processed = process_outbox_due(&ledger, &poster, now(), 10).unwrap();
    assert_eq!(processed, 0);

    // Past the backoff, the post succeeds and stamps the approval.
    let later = now() + Duration::seconds(10);
    let processed = process_outbox_due(&ledger, &poster, later, 10).unwrap();
    assert_eq!(processed, 1);

    let sent = ledger.get_outbox("slack:a1").unwrap().unwrap();
    assert_eq!(sent.status, OutboxStatus::Sent);
    assert_eq!(sent.sent_at.as_deref(), Some(format(later).as_str()));

    let approval = ledger.get_approval("a1").unwrap().unwrap();
    assert_eq!(approval.slack_msg_ts.as_deref(), Some("1700000000.1234"));
    assert_eq!(approval.slack_channel.as_deref(), Some("C1"));

    // A further pass finds nothing pending.
    let processed = process_outbox_due(&ledger, &poster, later, 10).unwrap();
    assert_eq!(processed, 0);
    assert_eq!(poster.call_count(), 2);
}

/// Tests the exponential backoff schedule and its ceiling.
#[test]
fn test_backoff_schedule() {
    assert_eq!(next_attempt_delay(0), Duration::seconds(5));
    assert_eq!(next_attempt_delay(1), Duration::seconds(10));
    assert_eq!(next_attempt_delay(2), Duration::seconds(20));
    assert_eq!(next_attempt_delay(5), Duration::seconds(160));
    assert_eq!(next_attempt_delay(6), Duration::seconds(300));
    assert_eq!(next_attempt_delay(20), Duration::seconds(300));
    assert_eq!(next_attempt_delay(-3), Duration::seconds(5));
}

// ============================================================================
// SECTION: Reconciliation and Poison Pills
// ============================================================================

/// Tests that an already-stamped approval reconciles without posting.
#[test]
fn test_reconciliation_skips_posting() {
    let ledger = ledger_with_pending(valid_message());
    let mut approval = ledger.get_approval("a1").unwrap().unwrap();
    approval.slack_msg_ts = Some("1699999999.0001".to_string());
    ledger.put_approval(&approval).unwrap();

    let poster = FlakyPoster::new(0);
    let processed = process_outbox_due(&ledger, &poster, now(), 10).unwrap();
    assert_eq!(processed, 1);
    assert_eq!(poster.call_count(), 0);

    let row = ledger.get_outbox("slack:a1").unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Sent);
}

/// Tests that an undecodable payload terminates with its error recorded.
#[test]
fn test_poison_pill_terminates() {
    let ledger = ledger_with_pending(b"{not json".to_vec());
    let poster = FlakyPoster::new(0);

    let processed = process_outbox_due(&ledger, &poster, now(), 10).unwrap();
    assert_eq!(processed, 1);
    assert_eq!(poster.call_count(), 0);

    let row = ledger.get_outbox("slack:a1").unwrap().unwrap();
    assert_eq!(row.status, OutboxStatus::Sent);
    assert!(row.last_error.as_deref().unwrap().starts_with("invalid message_json"));
}

/// Tests that one pass respects the row limit.
#[test]
fn test_pass_respects_limit() {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let created_base = now();
    for index in 0..3 {
        let created = format(created_base + Duration::seconds(index));
        ledger
            .put_outbox(&OutboxRow {
                notification_id: format!("slack:a{index}"),
                approval_id: ApprovalId::new(format!("a{index}")),
                channel: "C1".to_string(),
                message_json: valid_message(),
                status: OutboxStatus::Pending,
                attempt_count: 0,
                next_attempt_at: created.clone(),
                last_error: None,
                sent_at: None,
                created_at: created.clone(),
                updated_at: created,
            })
            .unwrap();
    }

    let poster = FlakyPoster::new(0);
    let processed = process_outbox_due(&ledger, &poster, now() + Duration::seconds(10), 2).unwrap();
    assert_eq!(processed, 2);

    // Oldest rows go first.
    assert_eq!(
        ledger.get_outbox("slack:a0").unwrap().unwrap().status,
        OutboxStatus::Sent
    );
    assert_eq!(
        ledger.get_outbox("slack:a2").unwrap().unwrap().status,
        OutboxStatus::Pending
    );
}

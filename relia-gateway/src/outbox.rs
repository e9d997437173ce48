// relia-gateway/src/outbox.rs
// ============================================================================
// Module: Approval Outbox Worker
// Description: At-least-once delivery of approval prompts with backoff.
// Purpose: Drain pending chat notifications from the ledger.
// Dependencies: relia-core, time, tokio, tracing
// ============================================================================

//! ## Overview
//! Outbox rows are created in the same ledger transaction as their approval,
//! so every pending approval eventually produces a chat prompt even when the
//! chat API is down at request time. The worker polls due rows oldest first,
//! reconciles rows whose approval already carries a message timestamp, and
//! terminates undecodable payloads as poison pills so one bad row never
//! blocks the queue. Failed posts back off exponentially with no attempt
//! cap; recovery is operator-driven.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use relia_core::Ledger;
use relia_core::LedgerError;
use relia_core::OutboxRow;
use relia_core::OutboxStatus;

use crate::slack::ApprovalMessage;
use crate::slack::ChatPoster;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Base retry delay.
const BACKOFF_BASE_SECONDS: i64 = 5;
/// Retry delay ceiling.
const BACKOFF_MAX_SECONDS: i64 = 300;
/// Default rows per tick.
const DEFAULT_TICK_LIMIT: usize = 25;

// ============================================================================
// SECTION: Processing
// ============================================================================

/// Returns the delay before the next delivery attempt: `5s * 2^attempts`,
/// clamped to five minutes.
#[must_use]
pub fn next_attempt_delay(attempt_count: i64) -> Duration {
    if attempt_count <= 0 {
        return Duration::seconds(BACKOFF_BASE_SECONDS);
    }
    // 5s * 2^7 already exceeds the ceiling; larger shifts would overflow.
    let shift = u32::try_from(attempt_count.min(7)).unwrap_or(7);
    Duration::seconds((BACKOFF_BASE_SECONDS << shift).min(BACKOFF_MAX_SECONDS))
}

/// Delivers due pending outbox rows, updating approvals and rows.
///
/// Returns the number of rows processed this pass.
///
/// # Errors
///
/// Returns [`LedgerError`] when ledger reads or writes fail; chat failures
/// are recorded on the row and retried later.
pub fn process_outbox_due(
    ledger: &Arc<dyn Ledger>,
    poster: &dyn ChatPoster,
    now: OffsetDateTime,
    limit: usize,
) -> Result<usize, LedgerError> {
    let limit = if limit == 0 { DEFAULT_TICK_LIMIT } else { limit };
    let now_text = format_rfc3339(now);
    let due = ledger.list_outbox_due(&now_text, limit)?;

    let mut processed = 0;
    for mut row in due {
        if row.status != OutboxStatus::Pending {
            continue;
        }

        let approval = ledger.get_approval(row.approval_id.as_str())?;
        if let Some(approval) = &approval {
            if approval
                .slack_msg_ts
                .as_deref()
                .is_some_and(|ts| !ts.is_empty())
            {
                mark_sent(ledger, &mut row, &now_text, None)?;
                processed += 1;
                continue;
            }
        }

        let message: ApprovalMessage = match serde_json::from_slice(&row.message_json) {
            Ok(message) => message,
            Err(err) => {
                // Poison pill: a payload that never decodes must not block
                // the queue.
                tracing::warn!(
                    notification_id = %row.notification_id,
                    error = %err,
                    "terminating undecodable outbox payload"
                );
                mark_sent(
                    ledger,
                    &mut row,
                    &now_text,
                    Some(format!("invalid message_json: {err}")),
                )?;
                processed += 1;
                continue;
            }
        };

        match poster.post_approval(&row.channel, &message) {
            Ok(msg_ts) => {
                if let Some(mut approval) = approval {
                    approval.slack_channel = Some(row.channel.clone());
                    approval.slack_msg_ts = Some(msg_ts);
                    approval.updated_at = now_text.clone();
                    // Best-effort: the row is still marked sent if this write
                    // races with an approval update.
                    let _ = ledger.put_approval(&approval);
                }
                mark_sent(ledger, &mut row, &now_text, None)?;
                processed += 1;
            }
            Err(err) => {
                let delay = next_attempt_delay(row.attempt_count);
                row.attempt_count += 1;
                row.next_attempt_at = format_rfc3339(now + delay);
                row.last_error = Some(err.to_string());
                row.updated_at = now_text.clone();
                ledger.put_outbox(&row)?;
                tracing::warn!(
                    notification_id = %row.notification_id,
                    attempt = row.attempt_count,
                    error = %err,
                    "chat post failed, backing off"
                );
                processed += 1;
            }
        }
    }

    Ok(processed)
}

fn mark_sent(
    ledger: &Arc<dyn Ledger>,
    row: &mut OutboxRow,
    now_text: &str,
    last_error: Option<String>,
) -> Result<(), LedgerError> {
    row.status = OutboxStatus::Sent;
    row.sent_at = Some(now_text.to_string());
    row.updated_at = now_text.to_string();
    if last_error.is_some() {
        row.last_error = last_error;
    }
    ledger.put_outbox(row)
}

fn format_rfc3339(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| String::new())
}

// ============================================================================
// SECTION: Worker Loop
// ============================================================================

/// Polls the outbox until the shutdown signal fires.
///
/// Each tick runs on the blocking pool so chat posting never stalls the
/// async runtime.
pub async fn run_outbox_worker(
    ledger: Arc<dyn Ledger>,
    poster: Arc<dyn ChatPoster>,
    poll_interval: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let poll_interval = if poll_interval.is_zero() {
        std::time::Duration::from_secs(2)
    } else {
        poll_interval
    };
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ledger = Arc::clone(&ledger);
                let poster = Arc::clone(&poster);
                let result = tokio::task::spawn_blocking(move || {
                    process_outbox_due(&ledger, poster.as_ref(), OffsetDateTime::now_utc(), DEFAULT_TICK_LIMIT)
                })
                .await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => tracing::error!(error = %err, "outbox pass failed"),
                    Err(err) => tracing::error!(error = %err, "outbox task panicked"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

//! Newline-delimited JSON completion notifications
//!
//! A webhook relay can pipe the launch service's end-of-call payloads into
//! the daemon's stdin, one JSON object per line.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::domain::CompletionNotification;
use crate::error::Result;
use crate::launcher::CallLauncher;
use crate::reconcile::Reconciler;

/// Parse one line; blank lines yield `None`
pub fn parse_notification(line: &str) -> Result<Option<CompletionNotification>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Feed every notification from `reader` to the push path until EOF
///
/// Malformed lines are logged and skipped. Returns the number of slots freed.
pub async fn feed_notifications<R, C>(reader: R, reconciler: Arc<Reconciler<C>>) -> usize
where
    R: AsyncBufRead + Unpin,
    C: CallLauncher + 'static,
{
    let mut lines = reader.lines();
    let mut freed = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Notification stream failed: {}", e);
                break;
            }
        };

        match parse_notification(&line) {
            Ok(Some(notification)) => {
                if reconciler.on_completion_push(&notification) {
                    freed += 1;
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Skipping malformed notification: {}", e),
        }
    }

    log::debug!("Notification stream closed after freeing {} slots", freed);
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockCallLauncher;
    use crate::reconcile::ReconcilerConfig;
    use crate::slots::SlotPool;
    use crate::sync::StatusSync;

    #[test]
    fn test_parse_notification() {
        assert!(parse_notification("   ").unwrap().is_none());
        let n = parse_notification(r#"{"call_id": "c-1", "ended_reason": "hangup"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(n.call_id, "c-1");
        assert!(parse_notification("{not json").is_err());
    }

    #[tokio::test]
    async fn test_feed_frees_slots_and_skips_garbage() {
        let (sync, _rx) = StatusSync::channel();
        let pool = Arc::new(SlotPool::new(["orig-0", "orig-1"]));
        for (lead, call) in [("lead-1", "c-1"), ("lead-2", "c-2")] {
            let claim = pool.claim_free_slot().unwrap();
            pool.bind_lead(&claim, lead);
            pool.mark_busy(&claim, call);
        }
        let reconciler = Arc::new(Reconciler::new(
            pool.clone(),
            Arc::new(MockCallLauncher::new()),
            sync,
            ReconcilerConfig::default(),
        ));

        let input = b"{\"call_id\": \"c-1\"}\n\ngarbage\n{\"call_id\": \"c-1\"}\n{\"call_id\": \"c-2\"}\n";
        let freed = feed_notifications(&input[..], reconciler).await;

        assert_eq!(freed, 2);
        assert_eq!(pool.free_count(), 2);
    }
}

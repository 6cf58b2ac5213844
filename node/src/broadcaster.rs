//! A retrying transaction broadcaster (`spec.md` §4.5 step 2: "broadcast it
//! retryably; broadcast may fail due to duplicate; keep retrying until told
//! to stop"). The actual network broadcast is an out-of-scope collaborator;
//! this module owns only the retry policy, grounded on
//! `common::backoff::get_backoff_iter` (copied from the teacher).

use async_trait::async_trait;

use common::backoff;
use common::shutdown::ShutdownChannel;

/// Whether a single broadcast attempt should be retried.
#[derive(Debug, Eq, PartialEq)]
pub enum BroadcastOutcome {
    Accepted,
    /// The mempool/chain already has this tx; treat as success.
    Duplicate,
    /// A transient failure; retry with backoff.
    Retry,
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn try_broadcast(&self, tx_hex: &str) -> anyhow::Result<BroadcastOutcome>;
}

/// Broadcast `tx_hex` until it is accepted or found to be a duplicate,
/// backing off between attempts, and giving up early if `shutdown` fires.
pub async fn broadcast_until_confirmed_or_duplicate(
    broadcaster: &dyn Broadcaster,
    tx_hex: &str,
    shutdown: &ShutdownChannel,
) -> anyhow::Result<()> {
    let mut backoffs = backoff::get_backoff_iter();
    loop {
        if shutdown.try_recv() {
            anyhow::bail!("shutting down before broadcast confirmed");
        }
        match broadcaster.try_broadcast(tx_hex).await? {
            BroadcastOutcome::Accepted | BroadcastOutcome::Duplicate => return Ok(()),
            BroadcastOutcome::Retry => {
                tokio::time::sleep(backoffs.next().expect("infinite iterator")).await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct FlakyBroadcaster {
        attempts: Arc<AtomicUsize>,
        succeed_after: usize,
    }

    #[async_trait]
    impl Broadcaster for FlakyBroadcaster {
        async fn try_broadcast(&self, _tx_hex: &str) -> anyhow::Result<BroadcastOutcome> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n + 1 >= self.succeed_after {
                Ok(BroadcastOutcome::Accepted)
            } else {
                Ok(BroadcastOutcome::Retry)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_accepted() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let broadcaster = FlakyBroadcaster {
            attempts: attempts.clone(),
            succeed_after: 3,
        };
        let shutdown = ShutdownChannel::new();
        broadcast_until_confirmed_or_duplicate(&broadcaster, "deadbeef", &shutdown)
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}

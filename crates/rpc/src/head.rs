//! Live head tracker (spec §4.4): a push-driven `latest` cursor with a
//! polling-style reconnect loop. Grounded on
//! `crates/l1_sidecar/src/l1_watcher.rs`'s `run`/`poll` shape — a
//! `tokio::time::interval`-driven loop that tolerates transient failures and
//! keeps going — adapted here from polling to a WS subscription with
//! exponential-ish backoff on reconnect.

use futures::StreamExt;
use jsonrpsee::core::client::{ClientT, SubscriptionClientT};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Caps how long the reconnect loop will back off between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct HeadTracker {
    latest: AtomicU64,
    has_value: AtomicBool,
}

impl HeadTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            latest: AtomicU64::new(0),
            has_value: AtomicBool::new(false),
        })
    }

    pub fn latest(&self) -> Option<u64> {
        if self.has_value.load(Ordering::SeqCst) {
            Some(self.latest.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    fn set(&self, height: u64) {
        self.latest.fetch_max(height, Ordering::SeqCst);
        self.has_value.store(true, Ordering::SeqCst);
    }

    /// Runs until `cancel` fires. On every connection loss — including the
    /// peer ending the `newHeads` subscription outright, not just a transport
    /// error — reconnects with exponential backoff starting at `retry_delay`
    /// and capped at [`MAX_BACKOFF`], mirroring the teacher's tolerance for
    /// transient L1 RPC failures in `L1Watcher::run` (spec §4.4: "On
    /// WebSocket disconnect, the tracker reconnects ... and re-subscribes").
    pub async fn run(self: Arc<Self>, ws_url: String, retry_delay: Duration, cancel: CancellationToken) {
        let mut backoff = retry_delay.max(Duration::from_millis(1));
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.subscribe_until_disconnected(&ws_url, &cancel).await {
                SubscribeExit::Cancelled => return,
                SubscribeExit::Disconnected(reason) => {
                    tracing::warn!(error = %reason, backoff_ms = backoff.as_millis(), "head tracker disconnected, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Why `subscribe_until_disconnected` can't just return a transport
    /// `Result`: the subscription stream ending (`None`, the peer closing it
    /// without erroring) is not a transport error but must still trigger a
    /// reconnect, while cancellation must not. Distinguishing the two as
    /// variants keeps `run()` from ever mistaking "peer hung up" for "told to
    /// stop".
    async fn subscribe_until_disconnected(
        &self,
        ws_url: &str,
        cancel: &CancellationToken,
    ) -> SubscribeExit {
        let client: WsClient = match WsClientBuilder::default().build(ws_url).await {
            Ok(client) => client,
            Err(err) => return SubscribeExit::Disconnected(err.to_string()),
        };

        // Prime with a direct call before trusting the subscription stream,
        // so a late first push doesn't leave `latest` unset.
        if let Ok(hex_height) = client
            .request::<String, _>("eth_blockNumber", ArrayParams::default())
            .await
        {
            if let Some(height) = parse_hex_u64(&hex_height) {
                self.set(height);
            }
        }

        let mut subscribe_params = ArrayParams::default();
        subscribe_params
            .insert("newHeads")
            .expect("string always serializes");
        let mut subscription = match client
            .subscribe::<Value, _>("eth_subscribe", subscribe_params, "eth_unsubscribe")
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => return SubscribeExit::Disconnected(err.to_string()),
        };

        loop {
            tokio::select! {
                next = subscription.next() => {
                    match next {
                        Some(Ok(head)) => {
                            if let Some(height) = head
                                .get("number")
                                .and_then(Value::as_str)
                                .and_then(parse_hex_u64)
                            {
                                self.set(height);
                            }
                        }
                        Some(Err(err)) => return SubscribeExit::Disconnected(err.to_string()),
                        None => {
                            return SubscribeExit::Disconnected(
                                "newHeads subscription stream ended".to_string(),
                            )
                        }
                    }
                }
                _ = cancel.cancelled() => return SubscribeExit::Cancelled,
            }
        }
    }
}

/// Why [`HeadTracker::subscribe_until_disconnected`] returned: either the
/// caller cancelled (stop for good), or the connection/subscription ended
/// for any other reason (reconnect with backoff).
enum SubscribeExit {
    Cancelled,
    Disconnected(String),
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_is_none_until_the_first_value_arrives() {
        let tracker = HeadTracker::new();
        assert_eq!(tracker.latest(), None);
        tracker.set(100);
        assert_eq!(tracker.latest(), Some(100));
    }

    #[test]
    fn set_never_moves_the_cursor_backwards() {
        let tracker = HeadTracker::new();
        tracker.set(50);
        tracker.set(10);
        assert_eq!(tracker.latest(), Some(50));
    }

    #[test]
    fn parses_0x_prefixed_hex_heights() {
        assert_eq!(parse_hex_u64("0x1a"), Some(26));
        assert_eq!(parse_hex_u64("1a"), Some(26));
        assert_eq!(parse_hex_u64("not-hex"), None);
    }

    /// A disconnect (here: the endpoint never accepts a connection, the
    /// same observable shape as the peer closing the subscription) must
    /// keep `run()` retrying with backoff, never returning on its own —
    /// only cancellation may stop it (spec §4.4).
    #[tokio::test]
    async fn run_keeps_retrying_on_disconnect_until_cancelled() {
        let tracker = HeadTracker::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(tracker.run(
            "ws://127.0.0.1:1".to_string(),
            Duration::from_millis(5),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "run() must not exit on its own after a disconnect");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run() should stop promptly once cancelled")
            .unwrap();
    }
}

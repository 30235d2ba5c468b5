//! Push channels backed by periodic list reads
//!
//! A watcher task re-reads a remote list on an interval and forwards the
//! batch whenever its fingerprint differs from the last one sent. The
//! first successful read is always forwarded.

use base64::{Engine as _, engine::general_purpose};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::data::Address;
use crate::error::AppError;

const CHANNEL_CAPACITY: usize = 8;

/// SHA-256 of the batch's JSON encoding
pub fn fingerprint<T: Serialize>(batch: &[T]) -> Result<String, AppError> {
    let encoded = serde_json::to_vec(batch)?;
    let digest = Sha256::digest(&encoded);
    Ok(general_purpose::STANDARD_NO_PAD.encode(digest))
}

/// Spawn a list watcher and return its receiving end
///
/// Read failures are logged and retried on the next tick. The task exits
/// when the receiver is dropped.
pub fn spawn_list_watcher<T, F, Fut>(
    kind: &'static str,
    address: Address,
    interval: Duration,
    read: F,
) -> mpsc::Receiver<Vec<T>>
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>, AppError>> + Send,
{
    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent: Option<String> = None;

        loop {
            tokio::select! {
                _ = sender.closed() => break,
                _ = ticker.tick() => {}
            }

            let batch = match read().await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(
                        kind,
                        address = %address,
                        error = %e,
                        "Push channel read failed"
                    );
                    continue;
                }
            };

            let current = match fingerprint(&batch) {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!(
                        kind,
                        address = %address,
                        error = %e,
                        "Push channel batch not fingerprinted"
                    );
                    continue;
                }
            };

            if last_sent.as_deref() == Some(current.as_str()) {
                continue;
            }

            tracing::debug!(
                kind,
                address = %address,
                items = batch.len(),
                "Push channel emitting batch"
            );
            if sender.send(batch).await.is_err() {
                break;
            }
            last_sent = Some(current);
        }

        tracing::debug!(kind, address = %address, "Push channel closed");
    });

    receiver
}

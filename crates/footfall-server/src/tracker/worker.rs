use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use footfall_core::{Hit, Store};

/// Drain `rx` into batches and save them.
///
/// A batch is flushed when it reaches `buffer_size` or `timeout` has passed
/// since the last flush. When every sender is gone the remaining hits are
/// flushed and the worker exits.
pub(crate) async fn run(
    id: usize,
    store: Arc<dyn Store>,
    mut rx: mpsc::Receiver<Hit>,
    buffer_size: usize,
    timeout: Duration,
) {
    let mut batch: Vec<Hit> = Vec::with_capacity(buffer_size);
    let mut deadline = Instant::now() + timeout;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(hit) => {
                    batch.push(hit);
                    if batch.len() >= buffer_size {
                        flush(id, store.as_ref(), &mut batch).await;
                        deadline = Instant::now() + timeout;
                    }
                }
                None => {
                    flush(id, store.as_ref(), &mut batch).await;
                    debug!(worker = id, "tracker worker stopped");
                    return;
                }
            },
            _ = sleep_until(deadline) => {
                flush(id, store.as_ref(), &mut batch).await;
                deadline = Instant::now() + timeout;
            }
        }
    }
}

async fn flush(id: usize, store: &dyn Store, batch: &mut Vec<Hit>) {
    if batch.is_empty() {
        return;
    }
    let hits = std::mem::take(batch);
    match store.save_hits(&hits).await {
        Ok(()) => debug!(worker = id, count = hits.len(), "hits saved"),
        Err(e) => error!(worker = id, count = hits.len(), error = %e, "saving hits failed, batch dropped"),
    }
}

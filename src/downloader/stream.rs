// Outcome stream handed back to callers of Orchestrator::download

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::models::DownloadOutcome;

/// Sending half; drops everything after the first terminal outcome.
#[derive(Debug, Clone)]
pub(crate) struct OutcomeSender {
    tx: mpsc::UnboundedSender<DownloadOutcome>,
    finished: Arc<AtomicBool>,
}

impl OutcomeSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Self {
            tx,
            finished: Arc::new(AtomicBool::new(false)),
        };
        (sender, rx)
    }

    pub(crate) fn send(&self, outcome: DownloadOutcome) {
        if outcome.is_terminal() {
            if self.finished.swap(true, Ordering::SeqCst) {
                return;
            }
        } else if self.finished.load(Ordering::SeqCst) {
            return;
        }
        // receiver gone means nobody is listening any more
        let _ = self.tx.send(outcome);
    }
}

/// Ordered outcomes of one download request.
///
/// Ends after exactly one `Completed` or `Failed`. Dropping the stream, or
/// calling [`DownloadStream::cancel`], stops the request and releases the
/// download slot.
pub struct DownloadStream {
    rx: mpsc::UnboundedReceiver<DownloadOutcome>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DownloadStream {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<DownloadOutcome>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            cancel,
            task: Some(task),
        }
    }

    pub async fn next(&mut self) -> Option<DownloadOutcome> {
        self.rx.recv().await
    }

    /// Drain the stream and return every outcome in order
    pub async fn collect_all(mut self) -> Vec<DownloadOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Drain the stream and return only the terminal outcome
    pub async fn finish(mut self) -> Option<DownloadOutcome> {
        let mut last = None;
        while let Some(outcome) = self.next().await {
            last = Some(outcome);
        }
        last.filter(DownloadOutcome::is_terminal)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the request task to unwind
    pub async fn cancel_and_wait(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Stream for DownloadStream {
    type Item = DownloadOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Download stream dropped, cancelling request");
            self.cancel.cancel();
        }
    }
}

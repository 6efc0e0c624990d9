//! Serial execution context for work that must not interleave.
//!
//! The [`MainQueue`] runs submitted futures one after another on a single
//! task. Writing results and observer notifications go through it so they are
//! applied in the order they were produced.

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

enum QueueItem {
    Work(BoxFuture<'static, ()>),
    Flush(oneshot::Sender<()>),
}

pub struct MainQueue {
    sender: mpsc::UnboundedSender<QueueItem>,
    _worker: JoinHandle<()>,
}

impl MainQueue {
    /// Spawn the queue's task on the current tokio runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueueItem>();
        let worker = tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                match item {
                    QueueItem::Work(work) => work.await,
                    QueueItem::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Main queue closed");
        });

        Self {
            sender,
            _worker: worker,
        }
    }

    /// Queue `work` behind everything submitted so far.
    pub fn post(&self, work: BoxFuture<'static, ()>) {
        if self.sender.send(QueueItem::Work(work)).is_err() {
            trace!("Main queue closed, dropping work");
        }
    }

    /// Wait until everything posted before this call has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(QueueItem::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

use gridcast_core::{LayoutSnapshot, SnapshotSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

enum AutoSaveCommand {
    Schedule(LayoutSnapshot),
    Flush(oneshot::Sender<Option<bool>>),
}

/// Handle onto the debounce task. Every schedule restarts the delay and only
/// the most recent snapshot is written. Dropping the last handle writes any
/// pending snapshot before the task exits.
#[derive(Clone)]
pub struct AutoSaveHandle {
    tx: mpsc::UnboundedSender<AutoSaveCommand>,
}

impl AutoSaveHandle {
    pub fn spawn<K>(sink: Arc<K>, delay: Duration) -> (Self, JoinHandle<()>)
    where
        K: SnapshotSink + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_autosave(sink, delay, rx));
        (Self { tx }, task)
    }

    pub fn schedule(&self, snapshot: LayoutSnapshot) {
        if self.tx.send(AutoSaveCommand::Schedule(snapshot)).is_err() {
            warn!("autosave_schedule_failed: task stopped");
        }
    }

    /// Write the pending snapshot now. `None` when nothing was pending.
    pub async fn flush(&self) -> Option<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(AutoSaveCommand::Flush(reply_tx)).ok()?;
        reply_rx.await.ok().flatten()
    }
}

async fn run_autosave<K>(
    sink: Arc<K>,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<AutoSaveCommand>,
) where
    K: SnapshotSink + ?Sized,
{
    let mut pending: Option<LayoutSnapshot> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(AutoSaveCommand::Schedule(snapshot)) => {
                    pending = Some(snapshot);
                    deadline = Some(Instant::now() + delay);
                }
                Some(AutoSaveCommand::Flush(reply)) => {
                    deadline = None;
                    let outcome = pending.take().map(|snapshot| write(sink.as_ref(), &snapshot));
                    let _ = reply.send(outcome);
                }
                None => {
                    if let Some(snapshot) = pending.take() {
                        write(sink.as_ref(), &snapshot);
                    }
                    break;
                }
            },
            _ = wait_for(deadline) => {
                deadline = None;
                if let Some(snapshot) = pending.take() {
                    write(sink.as_ref(), &snapshot);
                }
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn write<K: SnapshotSink + ?Sized>(sink: &K, snapshot: &LayoutSnapshot) -> bool {
    let saved = sink.save_snapshot(snapshot);
    if saved {
        debug!(widgets = snapshot.widgets.len(), "autosave_written");
    } else {
        warn!("autosave_failed: snapshot not persisted");
    }
    saved
}

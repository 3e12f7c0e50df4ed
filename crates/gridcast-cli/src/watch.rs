use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use gridcast_realtime::{
    job_subscription, Credentials, JobStatus, JobUpdate, RealtimeClient, SubscriptionError,
    SubscriptionEvent, SubscriptionSpec,
};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What a watch loop should do after handling an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Print every item of a generic subscription as one JSON line.
pub async fn watch<W: Write>(
    client: &RealtimeClient,
    credentials: Credentials,
    spec: SubscriptionSpec,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    limit: Option<usize>,
    out: &mut W,
    interrupt: impl Future<Output = ()>,
) -> Result<usize> {
    let mut seen = 0usize;
    follow(client, credentials, spec, events, interrupt, |item| {
        writeln!(out, "{}", serde_json::to_string(&item)?)?;
        seen += 1;
        Ok(match limit {
            Some(limit) if seen >= limit => Flow::Stop,
            _ => Flow::Continue,
        })
    })
    .await?;
    Ok(seen)
}

/// Follow one AI job until it reaches a terminal status.
pub async fn watch_job<W: Write>(
    client: &RealtimeClient,
    credentials: Credentials,
    job_id: &str,
    out: &mut W,
    interrupt: impl Future<Output = ()>,
) -> Result<Option<JobStatus>> {
    let (spec, events) = job_subscription(job_id);
    let mut last = None;
    follow(client, credentials, spec, events, interrupt, |item| {
        let Some(update) = JobUpdate::from_value(&item) else {
            warn!("job_update_unparsed: {item}");
            return Ok(Flow::Continue);
        };
        let progress = update
            .progress
            .map(|progress| format!(" {progress:.0}%"))
            .unwrap_or_default();
        writeln!(
            out,
            "[{}] {} {}{}",
            Utc::now().format("%H:%M:%S"),
            update.job_id,
            update.status,
            progress
        )?;
        if let Some(error) = &update.error {
            writeln!(out, "  error: {error}")?;
        }
        if let Some(result) = &update.result {
            writeln!(out, "  result: {result}")?;
        }
        last = Some(update.status);
        Ok(if update.status.is_terminal() {
            Flow::Stop
        } else {
            Flow::Continue
        })
    })
    .await?;
    Ok(last)
}

async fn follow<F>(
    client: &RealtimeClient,
    credentials: Credentials,
    spec: SubscriptionSpec,
    mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    interrupt: impl Future<Output = ()>,
    mut on_item: F,
) -> Result<()>
where
    F: FnMut(Value) -> Result<Flow>,
{
    let key = client.add_subscription(spec);
    if let Err(err) = client.connect(credentials).await {
        if !err.is_retryable() {
            client.remove_subscription(key).await;
            return Err(anyhow!(err).context("realtime connect"));
        }
        warn!("realtime_connect_deferred: {err}");
    }

    let mut status = client.watch_status();
    tokio::pin!(interrupt);
    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SubscriptionEvent::Next(item)) => match on_item(item) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => break Ok(()),
                    Err(err) => break Err(err),
                },
                Some(SubscriptionEvent::Error(SubscriptionError::ConnectionLost(reason))) => {
                    break Err(anyhow!("connection lost: {reason}"));
                }
                Some(SubscriptionEvent::Error(err)) => warn!("subscription_error: {err}"),
                Some(SubscriptionEvent::Complete) | None => break Ok(()),
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("realtime client stopped"));
                }
                let current = status.borrow_and_update().clone();
                if current.is_stale() {
                    warn!(
                        state = %current.state,
                        attempt = current.reconnect_attempt,
                        "realtime_data_stale"
                    );
                } else {
                    info!("realtime_live");
                }
            }
            _ = &mut interrupt => {
                info!("watch_interrupted");
                break Ok(());
            }
        }
    };

    client.remove_subscription(key).await;
    client.disconnect().await;
    outcome
}

/// Exit code for a finished job: zero only for a completed job.
pub fn job_exit_status(status: Option<JobStatus>) -> Result<()> {
    match status {
        Some(JobStatus::Completed) => Ok(()),
        Some(status) => bail!("job finished with status {status}"),
        None => bail!("job watch ended before a terminal status"),
    }
}

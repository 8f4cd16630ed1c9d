//! Async driver for a `Pipeline` on a single-threaded tokio runtime.

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use crate::pipeline::Pipeline;
use crate::protocol::{PageEvent, StorageChangeSet};

/// Read-only access to the running pipeline, executed between events.
pub type PageInspector = Box<dyn FnOnce(&Pipeline) + Send>;

pub struct PageChannels {
    pub events: mpsc::UnboundedReceiver<PageEvent>,
    pub inspections: mpsc::UnboundedReceiver<PageInspector>,
    pub settings_changes: broadcast::Receiver<StorageChangeSet>,
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Starts the pipeline and processes traffic until `Shutdown` arrives or the
/// event channel closes. Returns the torn-down pipeline.
pub async fn run_page(mut pipeline: Pipeline, channels: PageChannels) -> Pipeline {
    let PageChannels {
        mut events,
        mut inspections,
        mut settings_changes,
    } = channels;
    let origin = Instant::now();
    let mut settings_open = true;
    let mut inspections_open = true;

    pipeline.start(origin.elapsed());
    loop {
        let deadline = pipeline.next_deadline().map(|at| origin + at);
        tokio::select! {
            biased;

            change = settings_changes.recv(), if settings_open => match change {
                Ok(change_set) => {
                    let _ = pipeline.handle_event(origin.elapsed(), PageEvent::StorageChanged(change_set));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Page loop lagged on settings bus, skipped {} change(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Settings bus closed");
                    settings_open = false;
                }
            },
            inspector = inspections.recv(), if inspections_open => match inspector {
                Some(inspector) => inspector(&pipeline),
                None => inspections_open = false,
            },
            event = events.recv() => match event {
                Some(event) => {
                    if pipeline.handle_event(origin.elapsed(), event).is_break() {
                        break;
                    }
                }
                None => {
                    info!("Page event channel closed");
                    pipeline.teardown();
                    break;
                }
            },
            _ = sleep_until_deadline(deadline) => pipeline.advance_to(origin.elapsed()),
        }
    }
    pipeline
}

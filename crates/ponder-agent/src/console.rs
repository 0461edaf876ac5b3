//! Console adapter: stdin lines in, responses out.

use std::io::BufRead;
use std::sync::Arc;

use ponder_core::{AgentEvent, EventIngest, EventSubscriber, RawEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Typed on its own line, stops the agent.
pub const QUIT_COMMAND: &str = "/quit";

/// Read stdin on a plain thread and feed each line to `sink`.
///
/// Blocking stdin reads cannot be cancelled, so the reader thread is left
/// detached and dies with the process.
pub fn spawn_stdin_adapter(
    sink: Arc<dyn EventIngest>,
    shutdown: CancellationToken,
) -> JoinHandle<usize> {
    let (tx, rx) = mpsc::channel(64);
    let spawned = std::thread::Builder::new()
        .name("ponder-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Could not start stdin reader: {}", e);
    }
    tokio::spawn(forward_lines(rx, sink, shutdown))
}

/// Forward lines as `user_input` events until input ends, `/quit` is typed
/// or `shutdown` fires. Returns the number of events ingested.
pub async fn forward_lines(
    mut lines: mpsc::Receiver<String>,
    sink: Arc<dyn EventIngest>,
    shutdown: CancellationToken,
) -> usize {
    let mut forwarded = 0;
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == QUIT_COMMAND {
            shutdown.cancel();
            break;
        }
        sink.ingest(RawEvent::user_input(text));
        forwarded += 1;
    }
    forwarded
}

/// Console rendering of an agent event; `None` for events the console skips.
pub fn render(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::Response(response) => Some(format!("ponder> {}", response.text)),
        AgentEvent::GenerationFailed { reason, .. } => {
            Some(format!("ponder (wanted to speak: {}, but lost the thread)", reason))
        }
        AgentEvent::DaysArchived { days, .. } if !days.is_empty() => {
            Some(format!("ponder (archived {} day(s) of memories)", days.len()))
        }
        _ => None,
    }
}

/// Print rendered events to stdout until the bus closes.
pub fn spawn_printer(mut events: EventSubscriber) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = render(&event) {
                println!("{}", line);
            }
        }
    })
}

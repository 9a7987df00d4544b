//! Progress streaming endpoints (Server-Sent Events).
//!
//! The bus's subscriptions are synchronous, so each connection gets a
//! blocking forwarder task that pumps deliveries into an unbounded channel
//! the SSE stream reads from. Sequence numbers ride in the SSE `id` field;
//! a reconnecting client passes its cursor back via `?from=`.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use axum::extract::{Extension, Path, Query};
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;
use uuid::Uuid;

use scribe_core::{JobId, ProjectId};
use scribe_infra::GenerationService;
use scribe_progress::{Delivery, Subscription};

const HEARTBEAT_EVERY: Duration = Duration::from_secs(15);
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub fn router() -> Router {
    Router::new()
        .route("/jobs/:id/events", get(job_events))
        .route("/projects/:id/events", get(project_events))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    /// Sequence cursor: deliveries resume at this sequence number.
    #[serde(default)]
    from: Option<u64>,
}

/// GET /jobs/{id}/events?from=N
///
/// Streams one job's progress. Catch-up first (retained events from the
/// cursor, or a folded snapshot when the cursor has aged out), then live
/// events. Delivery is at-least-once; clients dedup by the `id` field.
async fn job_events(
    Extension(service): Extension<Arc<GenerationService>>,
    Path(id): Path<Uuid>,
    Query(params): Query<StreamParams>,
) -> axum::response::Response {
    let job_id = JobId::from_uuid(id);
    let from = params.from.unwrap_or(1);

    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    tokio::task::spawn_blocking(move || {
        let (backlog, sub) = match service.subscribe_job(job_id, from) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "job subscription failed");
                return;
            }
        };
        for delivery in backlog {
            if forward(&tx, &delivery).is_err() {
                return;
            }
        }
        pump(&tx, &sub);
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// GET /projects/{id}/events
///
/// Live progress for every job of a project. No per-job cursor, so no
/// catch-up: delivery starts with the next published event.
async fn project_events(
    Extension(service): Extension<Arc<GenerationService>>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let project_id = ProjectId::from_uuid(id);

    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();
    tokio::task::spawn_blocking(move || {
        let sub = match service.subscribe_project(project_id) {
            Ok(sub) => sub,
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "project subscription failed");
                return;
            }
        };
        pump(&tx, &sub);
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Forward live deliveries until either side disconnects.
fn pump(tx: &UnboundedSender<Result<SseEvent, Infallible>>, sub: &Subscription) {
    let mut last_heartbeat = Instant::now();
    loop {
        match sub.recv_timeout(POLL_TIMEOUT) {
            Ok(delivery) => {
                if forward(tx, &delivery).is_err() {
                    break;
                }
                last_heartbeat = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_heartbeat.elapsed() >= HEARTBEAT_EVERY {
                    let heartbeat = SseEvent::default().event("heartbeat").data("{}");
                    if tx.send(Ok(heartbeat)).is_err() {
                        break;
                    }
                    last_heartbeat = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn forward(
    tx: &UnboundedSender<Result<SseEvent, Infallible>>,
    delivery: &Delivery,
) -> Result<(), ()> {
    let (name, seq, data) = match delivery {
        Delivery::Event(event) => {
            let data = serde_json::to_string(event).map_err(|_| ())?;
            ("progress", event.seq, data)
        }
        Delivery::Snapshot(snapshot) => {
            let data = serde_json::to_string(snapshot).map_err(|_| ())?;
            ("snapshot", snapshot.seq, data)
        }
    };
    let sse_event = SseEvent::default()
        .event(name)
        .id(seq.to_string())
        .data(data);
    tx.send(Ok(sse_event)).map_err(|_| ())
}

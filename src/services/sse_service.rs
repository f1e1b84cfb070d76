use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::sse::ServerEvent,
    services::sse_events,
    state::session::UserSession,
};

/// Subscribe to a session's event stream and greet the new subscriber.
pub fn subscribe(session: &UserSession) -> broadcast::Receiver<ServerEvent> {
    let receiver = session.events().subscribe();
    sse_events::publish_handshake(session);
    receiver
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the client leaves.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    session_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(%session_id, skipped, "SSE subscriber lagging; events skipped");
                            continue;
                        }
                    }
                }
            }
        }

        info!(%session_id, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Forward sync phase changes of `session` to its event stream.
pub fn spawn_phase_forwarder(session: &Arc<UserSession>) -> JoinHandle<()> {
    let mut phases = session.sync().phases();
    let session = Arc::downgrade(session);

    tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            let Some(session) = session.upgrade() else {
                break;
            };
            sse_events::publish_sync_phase(&session, phase);
        }
    })
}

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;

/// GET /ws/clusters/{id}/events — live log lines, check results and phase changes
pub async fn cluster_events_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let cluster_id = path.into_inner();
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let mut events = state.hub.subscribe();

    info!("Event stream opened for cluster {}", cluster_id);

    actix_rt::spawn(async move {
        loop {
            tokio::select! {
                // Hub -> WebSocket
                event = events.recv() => match event {
                    Ok(event) if event.cluster_id() == cluster_id => {
                        let text = match serde_json::to_string(&event) {
                            Ok(t) => t,
                            Err(e) => {
                                warn!("Dropping unserializable event: {}", e);
                                continue;
                            }
                        };
                        if session.text(text).await.is_err() { break; }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Event stream for {} skipped {} events", cluster_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                },

                // Client -> server: only keepalive and close matter
                msg = msg_stream.next() => match msg {
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() { break; }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
        info!("Event stream closed for cluster {}", cluster_id);
        let _ = session.close(None).await;
    });

    Ok(res)
}

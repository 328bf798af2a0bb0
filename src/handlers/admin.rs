//! Real-time stream of admin notifications.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Extension,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

/// `GET /api/v1/admin/events`
///
/// Server-sent events; each event is named after the notification
/// (`payment.approved`, ...) and carries `{title, body, data}` as JSON.
/// Admins only.
pub async fn admin_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    auth.require_admin()?;
    info!(user_id = %auth.user_id, "admin event stream opened");

    let rx = state.broadcaster.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let event = Event::default()
                        .event(message.event)
                        .data(message.payload.to_string());
                    return Some((Ok(event), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "admin event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

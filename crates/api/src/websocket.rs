//! Token-expiry push channel.
//!
//! One WebSocket per client, one cooperative monitor task per socket, no
//! state shared between clients. The monitor polls the token's remaining
//! lifetime on an adaptive schedule and pushes a single "refresh soon"
//! message when 60 seconds or less remain, then ends. The receive loop
//! polls with a short timeout so a disconnect cancels the monitor
//! promptly without blocking shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::StreamExt;
use futures::SinkExt;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::state::AppState;

/// Warning threshold: one push when this many seconds (or fewer) remain.
const WARNING_THRESHOLD_SECONDS: i64 = 60;

/// Receive-loop poll timeout for disconnect detection.
const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct TokenMonitorQuery {
    pub token: String,
}

/// Adaptive polling schedule: seconds to sleep given seconds remaining.
pub fn monitor_sleep_seconds(time_remaining: i64) -> u64 {
    if time_remaining <= 0 {
        1
    } else if time_remaining > 600 {
        300
    } else if time_remaining > 300 {
        120
    } else if time_remaining > 120 {
        60
    } else if time_remaining > 60 {
        30
    } else if time_remaining > 10 {
        10
    } else {
        5
    }
}

/// `WS /ws/token-monitor?token=…`
///
/// Verifies the token signature only — the session-store check is
/// deliberately skipped so a channel can be opened for a token that is
/// about to expire.
pub async fn token_monitor_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenMonitorQuery>,
    State(state): State<AppState>,
) -> Response {
    let claims = match state.auth.jwt().decode_access_ignore_expiry(&query.token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket token verification failed");
            return ApiError::Unauthorized.into_response();
        }
    };

    tracing::info!(user_id = %claims.sub, "Token monitor connection accepted");
    let connections = state.ws_connections.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, connections, claims.exp))
}

/// `GET /ws/status`
pub async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connected = state.ws_connections.load(Ordering::Relaxed) > 0;
    Json(json!({ "connected": connected }))
}

async fn handle_socket(socket: WebSocket, connections: Arc<AtomicUsize>, exp: i64) {
    connections.fetch_add(1, Ordering::Relaxed);

    let (sender, mut receiver) = socket.split();
    let monitor = tokio::spawn(monitor_token(sender, exp));

    // Receive loop: short poll so we notice a dead peer even when it
    // never sends anything.
    loop {
        match tokio::time::timeout(RECEIVE_POLL_TIMEOUT, receiver.next()).await {
            Err(_) => {
                if monitor.is_finished() {
                    break;
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                tracing::info!("Token monitor client disconnected");
                break;
            }
            Ok(Some(Ok(message))) => {
                tracing::debug!(message = ?message, "Token monitor received message");
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(error = %e, "Token monitor receive error");
                break;
            }
        }
    }

    // Disconnect cancels the monitor.
    monitor.abort();
    connections.fetch_sub(1, Ordering::Relaxed);
    tracing::info!("Token monitor connection closed");
}

/// The per-client monitor: adaptive sleeps, one warning, then done.
async fn monitor_token(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    exp: i64,
) {
    loop {
        let remaining = exp - OffsetDateTime::now_utc().unix_timestamp();
        if remaining <= 0 {
            tracing::info!("Token already expired, ending monitor");
            break;
        }

        let sleep_seconds = monitor_sleep_seconds(remaining);
        tracing::debug!(
            remaining = remaining,
            sleep_seconds = sleep_seconds,
            "Token monitor tick"
        );
        tokio::time::sleep(Duration::from_secs(sleep_seconds)).await;

        let remaining = exp - OffsetDateTime::now_utc().unix_timestamp();
        if remaining <= WARNING_THRESHOLD_SECONDS {
            let payload = json!({
                "call_refresh": true,
                "time_remaining_seconds": remaining.max(0),
                "message": "Token expires soon, please refresh",
            });
            tracing::info!(remaining = remaining, "Sending token expiry warning");
            if let Err(e) = sender.send(Message::Text(payload.to_string())).await {
                tracing::debug!(error = %e, "Failed to send expiry warning");
            }
            // Exactly one warning per connection.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_matches_brackets() {
        assert_eq!(monitor_sleep_seconds(900), 300); // > 10 min
        assert_eq!(monitor_sleep_seconds(601), 300);
        assert_eq!(monitor_sleep_seconds(600), 120); // 5-10 min
        assert_eq!(monitor_sleep_seconds(450), 120);
        assert_eq!(monitor_sleep_seconds(300), 60); // 2-5 min
        assert_eq!(monitor_sleep_seconds(180), 60);
        assert_eq!(monitor_sleep_seconds(120), 30); // 1-2 min
        assert_eq!(monitor_sleep_seconds(90), 30);
        assert_eq!(monitor_sleep_seconds(61), 30);
        assert_eq!(monitor_sleep_seconds(60), 10); // 10 s - 1 min
        assert_eq!(monitor_sleep_seconds(45), 10);
        assert_eq!(monitor_sleep_seconds(11), 10);
        assert_eq!(monitor_sleep_seconds(10), 5); // < 10 s
        assert_eq!(monitor_sleep_seconds(3), 5);
    }

    #[test]
    fn expired_token_polls_immediately() {
        assert_eq!(monitor_sleep_seconds(0), 1);
        assert_eq!(monitor_sleep_seconds(-5), 1);
    }

    #[test]
    fn forty_five_seconds_remaining_sleeps_ten_then_warns() {
        // Scenario: connect with 45 s left. The first tick sleeps 10 s;
        // after it, ~35 s remain, which is at or under the threshold, so
        // the single warning fires.
        let remaining = 45;
        assert_eq!(monitor_sleep_seconds(remaining), 10);
        let after_sleep = remaining - 10;
        assert!(after_sleep <= WARNING_THRESHOLD_SECONDS);
    }
}

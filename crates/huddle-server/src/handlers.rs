//! Connection handlers for the Huddle server.
//!
//! Admission runs before the WebSocket upgrade so a refused connection gets
//! a plain HTTP status and never exchanges frames. An admitted connection
//! then runs one loop that forwards session broadcasts out and dispatches
//! client events in.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{
    Admission, AdmissionError, Authenticator, ConnectionId, DispatchError, Member, MemoryStore,
    Outcome, RegistryConfig, Rejection, Session, SessionProtocol, SessionRegistry, SessionStore,
    StoreError,
};
use huddle_protocol::{codec, ClientEvent, Encoded, ProtocolError, ServerFrame, WireFormat};
use serde::Deserialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Admission and event handling.
    pub protocol: SessionProtocol,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let registry = SessionRegistry::with_config(RegistryConfig {
            max_sessions: config.limits.max_sessions,
        });

        Self {
            protocol: SessionProtocol::new(Arc::new(registry), store, auth),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let route = state.config.session_route();
    Router::new()
        .route(&route, get(ws_handler))
        .route(&format!("{route}/"), get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the fixtures cannot be loaded or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = match &config.store.fixtures {
        Some(path) => {
            let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            let store = MemoryStore::from_file(&path)
                .with_context(|| format!("Failed to load fixtures: {path}"))?;
            info!(path = %path, "Loaded store fixtures");
            store
        }
        None => {
            warn!("No store fixtures configured; every admission will fail");
            MemoryStore::new()
        }
    };
    let store = Arc::new(store);
    let state = Arc::new(AppState::new(config.clone(), store.clone(), store));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "Session endpoint: ws://{}{}/{{session_id}}",
        addr,
        config.transport.websocket_path.trim_end_matches('/')
    );

    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Query parameters of the session endpoint.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
    format: Option<String>,
}

/// HTTP status for a refused admission.
fn admission_status(err: &AdmissionError) -> StatusCode {
    match err {
        AdmissionError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AdmissionError::NotParticipant(_) => StatusCode::FORBIDDEN,
        AdmissionError::SessionInactive(_) => StatusCode::GONE,
        AdmissionError::Registry(_) => StatusCode::SERVICE_UNAVAILABLE,
        AdmissionError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        AdmissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<u64>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let connection = ConnectionId::generate();
    let admission = match state
        .protocol
        .admit(session_id, params.token.as_deref(), connection)
        .await
    {
        Ok(admission) => admission,
        Err(e) => {
            if let AdmissionError::Store(StoreError::Unavailable(_) | StoreError::Backend(_)) = &e {
                error!(session_id, error = %e, "Admission failed");
                metrics::record_error("store");
            } else {
                warn!(session_id, reason = e.reason(), "Admission refused");
            }
            metrics::record_admission_refused(e.reason());
            return admission_status(&e).into_response();
        }
    };

    let format = WireFormat::from_query(params.format.as_deref());
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, admission, format))
}

/// Handle an admitted WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    admission: Admission,
    format: WireFormat,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let Admission { session, member } = admission;
    let connection = member.connection.clone();

    let mut inbox = match session.attach(&member).await {
        Ok(inbox) => inbox,
        Err(e) => {
            debug!(connection = %connection, error = %e, "Attach failed");
            return;
        }
    };
    metrics::set_active_sessions(state.protocol.registry().stats().session_count);

    debug!(
        session = %session.key(),
        connection = %connection,
        format = ?format,
        "WebSocket connected"
    );

    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = send_frame(&mut sender, &ServerFrame::Role(member.role), format).await {
        warn!(connection = %connection, error = %e, "Failed to send role frame");
        session.detach(&connection).await;
        return;
    }

    loop {
        tokio::select! {
            biased;

            // Session broadcasts
            broadcast = inbox.recv() => {
                let Some(broadcast) = broadcast else {
                    break;
                };
                match broadcast.render(&connection) {
                    Some(frame) => {
                        if send_frame(&mut sender, &frame, format).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(connection = %connection, "Session ended, closing");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            // Client events
            msg = receiver.next() => {
                let decoded = match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_bytes(text.len(), "inbound");
                        codec::decode_text(&text)
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_bytes(data.len(), "inbound");
                        codec::decode_binary(&data)
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection, "WebSocket stream ended");
                        break;
                    }
                };

                let flow = handle_event(&state, &session, &member, decoded, &mut sender, format).await;
                if flow.is_break() {
                    break;
                }
            }
        }
    }

    session.detach(&connection).await;
    metrics::set_active_sessions(state.protocol.registry().stats().session_count);

    debug!(connection = %connection, "WebSocket disconnected");
}

/// Dispatch one decoded event. `Break` closes the connection.
async fn handle_event(
    state: &AppState,
    session: &Arc<Session>,
    member: &Member,
    decoded: Result<ClientEvent, ProtocolError>,
    sender: &mut SplitSink<WebSocket, Message>,
    format: WireFormat,
) -> ControlFlow<()> {
    let result = match decoded {
        Ok(event) => {
            let name = event.name();
            metrics::record_event(name);
            let start = Instant::now();
            let result = state.protocol.dispatch(session, member, event).await;
            metrics::record_latency(start.elapsed().as_secs_f64());
            result
        }
        Err(e) => {
            debug!(connection = %member.connection, error = %e, "Undecodable frame");
            Err(DispatchError::Rejected(Rejection::Malformed))
        }
    };

    match result {
        Ok(Outcome::Applied) => ControlFlow::Continue(()),
        Ok(Outcome::SessionEnded) => {
            metrics::set_active_sessions(state.protocol.registry().stats().session_count);
            ControlFlow::Continue(())
        }
        Err(DispatchError::Rejected(rejection)) => {
            debug!(
                connection = %member.connection,
                email = %member.email,
                reason = %rejection,
                "Event rejected"
            );
            metrics::record_rejection(rejection.reason());
            if state.config.protocol.report_rejections
                && send_frame(sender, &rejection.to_frame(), format).await.is_err()
            {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
        Err(DispatchError::Store(e)) => {
            error!(
                session = %session.key(),
                connection = %member.connection,
                error = %e,
                "Store failure, closing connection"
            );
            metrics::record_error("store");
            ControlFlow::Break(())
        }
    }
}

/// Send a frame to the WebSocket in the connection's wire format.
async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
    format: WireFormat,
) -> Result<()> {
    let encoded = codec::encode(frame, format)?;
    metrics::record_frame(frame.kind(), encoded.len());
    let message = match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::{CardSelection, Estimate, Role, VoteState};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    const FIXTURES: &str = include_str!("../../../demos/fixtures.toml");

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(config: Config) -> SocketAddr {
        let store = Arc::new(MemoryStore::from_toml_str(FIXTURES).unwrap());
        let state = Arc::new(AppState::new(config, store.clone(), store));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    /// Connect and consume the role frame, so the connection is attached.
    async fn join(addr: SocketAddr, token: &str) -> (Client, Role) {
        let url = format!("ws://{addr}/session/7?token={token}");
        let (mut client, _) = connect_async(url).await.unwrap();
        match next_frame(&mut client).await {
            ServerFrame::Role(role) => (client, role),
            other => panic!("expected role frame, got {:?}", other),
        }
    }

    async fn next_message(client: &mut Client) -> Option<WsMessage> {
        tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .map(|msg| msg.unwrap())
    }

    async fn next_frame(client: &mut Client) -> ServerFrame {
        loop {
            match next_message(client).await {
                Some(WsMessage::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(WsMessage::Binary(data)) => {
                    return huddle_protocol::decode_frame_binary(&data).unwrap()
                }
                Some(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue,
                other => panic!("expected a frame, got {:?}", other),
            }
        }
    }

    async fn send(client: &mut Client, json: &str) {
        client.send(WsMessage::Text(json.to_string())).await.unwrap();
    }

    async fn refused_status(addr: SocketAddr, path: &str) -> u16 {
        match connect_async(format!("ws://{addr}{path}")).await {
            Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connection to {path} was accepted"),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admission_status_codes() {
        let addr = spawn_server(Config::default()).await;

        assert_eq!(refused_status(addr, "/session/7").await, 401);
        assert_eq!(refused_status(addr, "/session/7?token=nope").await, 401);
        assert_eq!(refused_status(addr, "/session/7?token=stranger-token").await, 403);
        assert_eq!(refused_status(addr, "/session/99?token=p1-token").await, 404);
        assert_eq!(refused_status(addr, "/session/8?token=p1-token").await, 410);
    }

    #[tokio::test]
    async fn test_registry_full() {
        let mut config = Config::default();
        config.limits.max_sessions = 0;
        let addr = spawn_server(config).await;

        assert_eq!(refused_status(addr, "/session/7?token=p1-token").await, 503);
    }

    #[tokio::test]
    async fn test_join_sends_role() {
        let addr = spawn_server(Config::default()).await;

        let (_player, role) = join(addr, "p1-token").await;
        assert_eq!(role, Role::Player);
        let (_watcher, role) = join(addr, "watcher-token").await;
        assert_eq!(role, Role::Spectator);
    }

    #[tokio::test]
    async fn test_vote_reaches_each_audience() {
        let addr = spawn_server(Config::default()).await;
        let (mut moderator, _) = join(addr, "mod-token").await;
        let (mut voter, _) = join(addr, "p1-token").await;
        let (mut peer, _) = join(addr, "p2-token").await;

        send(&mut voter, r#"{"event":"card_selected","card":"5","email":"forged@example.com"}"#).await;

        let selection = CardSelection {
            email: "p1@example.com".into(),
            card: Estimate(5),
        };
        assert_eq!(
            next_frame(&mut voter).await,
            ServerFrame::CardSelected(selection.clone())
        );
        assert_eq!(
            next_frame(&mut peer).await,
            ServerFrame::CardSelectedByPlayer {
                email: "p1@example.com".into()
            }
        );
        assert_eq!(
            next_frame(&mut moderator).await,
            ServerFrame::CardSelectedByPlayer {
                email: "p1@example.com".into()
            }
        );
        assert_eq!(
            next_frame(&mut moderator).await,
            ServerFrame::CardSelectedForModerator(selection)
        );

        send(&mut moderator, r#"{"event":"users_estimation"}"#).await;
        let ServerFrame::UsersEstimation(votes) = next_frame(&mut peer).await else {
            panic!("expected users_estimation");
        };
        assert_eq!(votes["p1@example.com"], VoteState::Voted(5));
        assert_eq!(votes["p2@example.com"], VoteState::NotVoted);
    }

    #[tokio::test]
    async fn test_rejections_are_silent_by_default() {
        let addr = spawn_server(Config::default()).await;
        let (mut player, _) = join(addr, "p1-token").await;

        send(&mut player, r#"{"event":"start_timer"}"#).await;
        send(&mut player, "not json").await;
        send(&mut player, r#"{"event":"card_selected","card":3}"#).await;

        // nothing arrives for the two rejected events
        assert!(matches!(
            next_frame(&mut player).await,
            ServerFrame::CardSelected(_)
        ));
    }

    #[tokio::test]
    async fn test_rejections_reported_when_configured() {
        let mut config = Config::default();
        config.protocol.report_rejections = true;
        let addr = spawn_server(config).await;
        let (mut player, _) = join(addr, "p1-token").await;
        let (mut watcher, _) = join(addr, "watcher-token").await;

        send(&mut player, r#"{"event":"start_timer"}"#).await;
        assert_eq!(
            next_frame(&mut player).await,
            ServerFrame::error(4003, "not_moderator")
        );

        send(&mut player, r#"{"event":"shuffle"}"#).await;
        assert_eq!(next_frame(&mut player).await, ServerFrame::error(4000, "malformed"));

        send(&mut watcher, r#"{"event":"card_selected","card":3}"#).await;
        assert_eq!(next_frame(&mut watcher).await, ServerFrame::error(4004, "not_player"));
    }

    #[tokio::test]
    async fn test_msgpack_format() {
        let addr = spawn_server(Config::default()).await;
        let url = format!("ws://{addr}/session/7?token=p1-token&format=msgpack");
        let (mut client, _) = connect_async(url).await.unwrap();

        match next_message(&mut client).await {
            Some(WsMessage::Binary(data)) => assert_eq!(
                huddle_protocol::decode_frame_binary(&data).unwrap(),
                ServerFrame::Role(Role::Player)
            ),
            other => panic!("expected binary role frame, got {:?}", other),
        }

        // inbound JSON is still accepted on a msgpack connection
        send(&mut client, r#"{"event":"card_selected","card":8}"#).await;
        assert!(matches!(
            next_frame(&mut client).await,
            ServerFrame::CardSelected(_)
        ));
    }

    #[tokio::test]
    async fn test_finalize_flow() {
        let addr = spawn_server(Config::default()).await;
        let (mut moderator, _) = join(addr, "mod-token").await;
        let (mut player, _) = join(addr, "p1-token").await;

        send(&mut player, r#"{"event":"fetch_tickets"}"#).await;
        send(&mut player, r#"{"event":"get_current_ticket"}"#).await;
        let ServerFrame::CurrentTicket(item) = next_frame(&mut player).await else {
            panic!("expected current ticket");
        };
        assert_eq!(item.key, "PROJ-1");
        next_frame(&mut moderator).await;

        send(&mut moderator, r#"{"event":"final_estimation","estimation":"5"}"#).await;
        let ServerFrame::FinalEstimation(final_estimate) = next_frame(&mut player).await else {
            panic!("expected final_estimation");
        };
        assert_eq!(final_estimate.work_item_id, 100);
        assert_eq!(final_estimate.estimation, Estimate(5));
        assert_eq!(final_estimate.email, "mod@example.com");
    }

    #[tokio::test]
    async fn test_end_game_closes_connections() {
        let addr = spawn_server(Config::default()).await;
        let (mut moderator, _) = join(addr, "mod-token").await;
        let (mut player, _) = join(addr, "p1-token").await;

        send(&mut moderator, r#"{"event":"end_game"}"#).await;

        for client in [&mut moderator, &mut player] {
            match next_message(client).await {
                Some(WsMessage::Close(_)) | None => {}
                other => panic!("expected close, got {:?}", other),
            }
        }

        assert_eq!(refused_status(addr, "/session/7?token=p2-token").await, 410);
    }
}

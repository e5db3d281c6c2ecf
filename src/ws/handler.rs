//! WebSocket upgrade handler and per-connection session

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppState, SessionGuard};
use crate::tournament::{
    Outbound, OutboundQueue, PlayerId, PlayerLink, ServiceError, TournamentHandle,
};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Outbound messages buffered per connection before delivery fails
const OUTBOUND_QUEUE: usize = 32;

/// Time allowed for queued messages to flush after the reader stops
const WRITER_FLUSH: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let guard = state.sessions.track();
    ws.on_upgrade(move |socket| handle_socket(socket, state.tournament, guard))
}

/// Handle the upgraded WebSocket connection. The session counts as live
/// until `_guard` drops at the end.
async fn handle_socket(socket: WebSocket, tournament: TournamentHandle, _guard: SessionGuard) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (link, outbound) = PlayerLink::channel(OUTBOUND_QUEUE);

    let mut writer_handle = tokio::spawn(run_writer(session_id, ws_sink, outbound));

    let player_id = run_reader(session_id, ws_stream, &link, &tournament).await;

    // Cleanup on disconnect
    if let Some(player_id) = player_id {
        if tournament.leave(player_id).await.is_err() {
            debug!(session_id = %session_id, "Tournament service gone, skipping leave");
        }
    }

    drop(link);
    if tokio::time::timeout(WRITER_FLUSH, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    info!(session_id = %session_id, player_id = ?player_id, "WebSocket connection closed");
}

/// Outbound queue -> WebSocket. Ends on a close request or when every
/// link to this connection is gone.
async fn run_writer(
    session_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: OutboundQueue,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(msg) => {
                if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                    debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                    break;
                }
            }
            Outbound::Close => {
                debug!(session_id = %session_id, "Closing connection");
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// WebSocket -> tournament. Returns the player identity if the session joined.
async fn run_reader(
    session_id: Uuid,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    link: &PlayerLink,
    tournament: &TournamentHandle,
) -> Option<PlayerId> {
    let rate_limiter = ConnectionRateLimiter::new();
    let mut player_id: Option<PlayerId> = None;

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        };

        if !rate_limiter.check_input() {
            warn!(session_id = %session_id, "Rate limited input message");
            continue;
        }

        let msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                let _ = link.send(ServerMsg::error("Invalid message."));
                continue;
            }
        };

        match (msg, player_id) {
            (ClientMsg::Join, Some(_)) => {
                let _ = link.send(ServerMsg::error("You have already joined."));
            }
            (ClientMsg::Join, None) => match tournament.join(link.clone()).await {
                Ok(id) => {
                    info!(session_id = %session_id, player_id = id, "Session joined tournament");
                    player_id = Some(id);
                }
                Err(ServiceError::Rejected(e)) => {
                    info!(session_id = %session_id, reason = %e, "Join rejected");
                    let _ = link.send(ServerMsg::error(e.to_string()));
                    let _ = link.close();
                    break;
                }
                Err(ServiceError::Stopped) => break,
            },
            (ClientMsg::Choice { .. }, None) => {
                let _ = link.send(ServerMsg::error("You have not joined the tournament."));
            }
            (ClientMsg::Choice { choice }, Some(id)) => {
                if tournament.choice(id, choice).await.is_err() {
                    break;
                }
            }
        }
    }

    player_id
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use crate::app::AppState;
    use crate::config::{Config, TournamentSettings};
    use crate::http::build_router;
    use crate::tournament::{TournamentService, TournamentStatus};
    use crate::ws::protocol::ServerMsg;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(2);

    fn settings(start_delay: Duration) -> TournamentSettings {
        TournamentSettings {
            start_delay,
            min_players: 2,
            shutdown_on_finish: false,
        }
    }

    /// Serve the full router on an ephemeral port
    async fn serve(settings: TournamentSettings) -> (String, AppState) {
        let (service, handle) = TournamentService::new(&settings);
        tokio::spawn(service.run());

        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            tournament: settings,
        };
        let state = AppState::new(config, handle);
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (format!("ws://{addr}/ws"), state)
    }

    async fn connect(url: &str) -> Client {
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, text: &str) {
        ws.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    /// Next text frame, decoded
    async fn next_msg(ws: &mut Client) -> ServerMsg {
        loop {
            let frame = timeout(WAIT, ws.next()).await.unwrap();
            match frame {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(WsMessage::Close(_))) | None => panic!("connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("websocket error: {e}"),
            }
        }
    }

    /// Whether the server closes the connection before any further text
    async fn closed_by_server(ws: &mut Client) -> bool {
        loop {
            match timeout(WAIT, ws.next()).await {
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(WsMessage::Text(_)))) | Err(_) => return false,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    async fn wait_for_status(
        state: &AppState,
        done: impl Fn(&TournamentStatus) -> bool,
    ) -> TournamentStatus {
        timeout(WAIT, async {
            loop {
                let status = state.tournament.status().await.unwrap();
                if done(&status) {
                    return status;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn malformed_json_is_reported() {
        let (url, _state) = serve(settings(Duration::from_secs(60))).await;
        let mut ws = connect(&url).await;

        send(&mut ws, "{not json").await;
        assert_eq!(next_msg(&mut ws).await, ServerMsg::error("Invalid message."));

        send(&mut ws, r#"{"type":"choice","choice":"lizard"}"#).await;
        assert_eq!(next_msg(&mut ws).await, ServerMsg::error("Invalid message."));
    }

    #[tokio::test]
    async fn second_join_is_refused() {
        let (url, state) = serve(settings(Duration::from_secs(60))).await;
        let mut ws = connect(&url).await;

        send(&mut ws, r#"{"type":"join"}"#).await;
        assert_eq!(next_msg(&mut ws).await, ServerMsg::PlayerCount { count: 1 });

        send(&mut ws, r#"{"type":"join"}"#).await;
        assert_eq!(
            next_msg(&mut ws).await,
            ServerMsg::error("You have already joined.")
        );
        assert_eq!(state.tournament.status().await.unwrap().players, 1);
    }

    #[tokio::test]
    async fn choice_before_join_is_refused() {
        let (url, state) = serve(settings(Duration::from_secs(60))).await;
        let mut ws = connect(&url).await;

        send(&mut ws, r#"{"type":"choice","choice":"rock"}"#).await;
        assert_eq!(
            next_msg(&mut ws).await,
            ServerMsg::error("You have not joined the tournament.")
        );
        assert_eq!(state.tournament.status().await.unwrap().players, 0);
    }

    #[tokio::test]
    async fn join_during_tournament_is_rejected_and_closed() {
        let (url, state) = serve(settings(Duration::from_millis(50))).await;
        let mut first = connect(&url).await;
        let mut second = connect(&url).await;
        send(&mut first, r#"{"type":"join"}"#).await;
        send(&mut second, r#"{"type":"join"}"#).await;
        wait_for_status(&state, |s| s.in_progress).await;

        let mut late = connect(&url).await;
        send(&mut late, r#"{"type":"join"}"#).await;
        assert_eq!(
            next_msg(&mut late).await,
            ServerMsg::error("Tournament is already in progress.")
        );
        assert!(closed_by_server(&mut late).await);

        let status = state.tournament.status().await.unwrap();
        assert_eq!(status.players, 2);
        assert!(status.in_progress);
    }

    #[tokio::test]
    async fn socket_close_leaves_tournament() {
        let (url, state) = serve(settings(Duration::from_secs(60))).await;
        let mut stays = connect(&url).await;
        let mut goes = connect(&url).await;

        send(&mut stays, r#"{"type":"join"}"#).await;
        assert_eq!(next_msg(&mut stays).await, ServerMsg::PlayerCount { count: 1 });
        send(&mut goes, r#"{"type":"join"}"#).await;
        assert_eq!(next_msg(&mut stays).await, ServerMsg::PlayerCount { count: 2 });

        goes.close(None).await.unwrap();

        assert_eq!(next_msg(&mut stays).await, ServerMsg::PlayerCount { count: 1 });
        wait_for_status(&state, |s| s.players == 1).await;
        assert!(timeout(WAIT, async {
            while state.sessions.active() > 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn sessions_drain_after_tournament_closes_connections() {
        let (url, state) = serve(settings(Duration::from_millis(50))).await;
        let mut first = connect(&url).await;
        let mut second = connect(&url).await;
        send(&mut first, r#"{"type":"join"}"#).await;
        send(&mut second, r#"{"type":"join"}"#).await;
        wait_for_status(&state, |s| s.in_progress).await;

        // A departure crowns the opponent and closes the remaining connection
        first.close(None).await.unwrap();

        let mut champion_id = None;
        loop {
            match timeout(WAIT, second.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => {
                    if let ServerMsg::TournamentEnd {
                        champion_id: Some(id),
                        ..
                    } = serde_json::from_str(&text).unwrap()
                    {
                        champion_id = Some(id);
                    }
                }
                // keep reading so the close reply is flushed
                Some(Ok(_)) => continue,
                None | Some(Err(_)) => break,
            }
        }
        assert!(champion_id.is_some());

        tokio_test::assert_ok!(timeout(WAIT, state.sessions.wait_idle()).await);
    }
}

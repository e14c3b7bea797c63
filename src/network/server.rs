//! WebSocket Game Server
//!
//! Accepts connections, resolves inbound events to engine operations and
//! fans personalised snapshots back out. One reader loop and one
//! channel-fed writer task per connection; all game mutation happens under
//! the owning room's lock, all sends happen after the lock is released.
//!
//! Three timer classes drive the game forward: per-turn and per-offer
//! (at most one each per room, replacement aborts the old handle) and the
//! process-wide cleanup sweep.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::core::constants::{CLEANUP_INTERVAL, OFFER_PAUSE_MS};
use crate::game::engine::{self, EngineOutput, TimerCommand};
use crate::game::state::{ConnectionId, PlayerId, Room};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::store::{RoomStore, StoreConfig};

/// Wall-clock time in epoch milliseconds. All wire deadlines use this.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (`PORT`).
    pub bind_addr: SocketAddr,
    /// Allowed `Origin` headers (`CORS_ORIGINS`, comma list, `*` wildcard).
    pub cors_origins: Vec<String>,
    /// Sweep interval (`ROOM_CLEANUP_INTERVAL_MS`).
    pub cleanup_interval: Duration,
    /// Room TTLs (`ROOM_WAITING_TTL_MS` and friends).
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr"),
            cors_origins: vec!["*".to_string()],
            cleanup_interval: CLEANUP_INTERVAL,
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the environment, falling back to defaults
    /// with a warning on malformed values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_u64("PORT") {
            config.bind_addr = SocketAddr::from(([0, 0, 0, 0], port as u16));
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                config.cors_origins = parsed;
            }
        }
        if let Some(ms) = env_u64("ROOM_CLEANUP_INTERVAL_MS") {
            config.cleanup_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("ROOM_WAITING_TTL_MS") {
            config.store.waiting_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("ROOM_SELECTION_TTL_MS") {
            config.store.selection_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("ROOM_FINISHED_TTL_MS") {
            config.store.finished_ttl = Duration::from_millis(ms);
        }
        config
    }

    /// Whether a handshake `Origin` header is acceptable. Absent headers
    /// pass (non-browser clients).
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.cors_origins.iter().any(|o| o == "*") {
            return true;
        }
        match origin {
            None => true,
            Some(origin) => self.cors_origins.iter().any(|o| o == origin),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}", name, raw);
            None
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Cancellable one-shot timers for a room, one slot per class.
#[derive(Default)]
struct RoomTimers {
    turn: Option<JoinHandle<()>>,
    offer: Option<JoinHandle<()>>,
}

impl RoomTimers {
    fn abort_all(&mut self) {
        if let Some(h) = self.turn.take() {
            h.abort();
        }
        if let Some(h) = self.offer.take() {
            h.abort();
        }
    }
}

/// The game server: accept loop, event dispatcher, timers and the
/// cleanup worker. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct GameServer {
    config: Arc<ServerConfig>,
    store: Arc<RoomStore>,
    timers: Arc<RwLock<BTreeMap<String, RoomTimers>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server from configuration.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store: Arc::new(RoomStore::new(config.store.clone())),
            config: Arc::new(config),
            timers: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        // Spawn the cleanup worker
        let sweeper = self.clone();
        let cleanup_handle = tokio::spawn(async move {
            sweeper.run_cleanup_loop().await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, addr).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // =========================================================================
    // CONNECTION HANDLING
    // =========================================================================

    /// Drive one connection: handshake with origin check, writer task fed
    /// by the connection's channel, reader loop dispatching events.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let config = self.config.clone();
        let check_origin = move |req: &Request, response: Response| {
            let origin = req
                .headers()
                .get("origin")
                .and_then(|v| v.to_str().ok());
            if config.origin_allowed(origin) {
                Ok(response)
            } else {
                warn!("Rejected origin {:?} from {}", origin, addr);
                let mut forbidden = ErrorResponse::new(Some("Origin not allowed".to_string()));
                *forbidden.status_mut() = StatusCode::FORBIDDEN;
                Err(forbidden)
            }
        };

        let ws_stream = match accept_hdr_async(stream, check_origin).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
        };

        let connection_id = ConnectionId::generate();
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
        self.store
            .register_connection(connection_id.clone(), msg_tx)
            .await;

        // Writer task: serialize and push until the channel closes
        let sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        // Reader loop
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match ClientMessage::from_json(&text) {
                    Ok(msg) => self.dispatch(&connection_id, msg).await,
                    Err(e) => {
                        debug!("Invalid message from {}: {}", addr, e);
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error for {}: {}", addr, e);
                    break;
                }
            }
        }

        sender_task.abort();
        self.on_disconnect(&connection_id).await;
        debug!("Connection {} from {} closed", connection_id, addr);
    }

    /// Best-effort direct send. Dropping on a full channel is fine: the
    /// next state broadcast supersedes anything lost.
    async fn send_to(&self, connection_id: &ConnectionId, message: ServerMessage) {
        if let Some(sender) = self.store.sender(connection_id).await {
            if sender.try_send(message).is_err() {
                debug!("Dropped message for slow connection {}", connection_id);
            }
        }
    }

    /// Resolve connection -> player -> room.
    async fn resolve(
        &self,
        connection_id: &ConnectionId,
    ) -> Option<(PlayerId, Arc<RwLock<Room>>, String)> {
        let player_id = self.store.connection_player(connection_id).await?;
        let (room, code) = self.store.player_room(&player_id).await?;
        Some((player_id, room, code))
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Route one inbound event. Ack-bearing requests always answer;
    /// game events on bad state are dropped and corrected by the next
    /// broadcast.
    async fn dispatch(&self, connection_id: &ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::CreateRoom {
                request_id,
                player_name,
            } => {
                self.handle_create_room(connection_id, request_id, player_name)
                    .await;
            }
            ClientMessage::JoinRoom {
                request_id,
                room_code,
                player_name,
                password,
                as_spectator,
            } => {
                self.handle_join_room(
                    connection_id,
                    request_id,
                    room_code,
                    player_name,
                    password,
                    as_spectator.unwrap_or(false),
                )
                .await;
            }
            ClientMessage::ReconnectPlayer {
                request_id,
                player_id,
            } => {
                self.handle_reconnect(connection_id, request_id, player_id)
                    .await;
            }
            ClientMessage::SetRoomPassword {
                request_id,
                password,
            } => {
                self.handle_set_password(connection_id, request_id, password)
                    .await;
            }
            ClientMessage::GetGlobalLeaderboard { request_id } => {
                let leaderboard = self.store.top_global().await;
                self.send_to(
                    connection_id,
                    ServerMessage::GlobalLeaderboardResult {
                        request_id,
                        success: true,
                        leaderboard,
                    },
                )
                .await;
            }
            ClientMessage::SelectBox { box_number } => {
                self.with_room(connection_id, |room, pid| {
                    engine::select_box(room, pid, box_number)
                })
                .await;
            }
            ClientMessage::PlayerReady => {
                self.with_room(connection_id, |room, pid| engine::toggle_ready(room, pid))
                    .await;
            }
            ClientMessage::StartGame => {
                let now = now_millis();
                self.with_room(connection_id, move |room, pid| {
                    engine::start_game(room, pid, now)
                })
                .await;
            }
            ClientMessage::OpenBox { box_number } => {
                let now = now_millis();
                self.with_room(connection_id, move |room, pid| {
                    engine::open_box(room, pid, box_number, now)
                })
                .await;
            }
            ClientMessage::DealResponse { accepted } => {
                let now = now_millis();
                self.with_room(connection_id, move |room, pid| {
                    engine::deal_response(room, pid, accepted, now)
                })
                .await;
            }
            ClientMessage::ChatMessage { content } => {
                let now = now_millis();
                self.with_room(connection_id, move |room, pid| {
                    engine::chat(room, pid, &content, now)
                })
                .await;
            }
        }
    }

    /// Run an engine operation under the caller's room lock, then apply
    /// the output after releasing it. Unresolvable connections drop
    /// silently.
    async fn with_room<F>(&self, connection_id: &ConnectionId, op: F)
    where
        F: FnOnce(&mut Room, &PlayerId) -> EngineOutput,
    {
        let Some((player_id, room, code)) = self.resolve(connection_id).await else {
            return;
        };
        let out = {
            let mut guard = room.write().await;
            op(&mut *guard, &player_id)
        };
        self.apply_output(&code, out).await;
    }

    async fn handle_create_room(
        &self,
        connection_id: &ConnectionId,
        request_id: u64,
        player_name: String,
    ) {
        if player_name.trim().is_empty() {
            self.send_to(
                connection_id,
                ServerMessage::CreateRoomResult {
                    request_id,
                    success: false,
                    room_code: None,
                    player_id: None,
                    error: Some("Player name is required".to_string()),
                },
            )
            .await;
            return;
        }

        let (room, code, player_id) = self
            .store
            .create(connection_id.clone(), &player_name)
            .await;

        self.send_to(
            connection_id,
            ServerMessage::CreateRoomResult {
                request_id,
                success: true,
                room_code: Some(code.clone()),
                player_id: Some(player_id.to_string()),
                error: None,
            },
        )
        .await;

        let out = {
            let guard = room.read().await;
            engine::after_join(&guard, &player_id)
        };
        self.apply_output(&code, out).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_join_room(
        &self,
        connection_id: &ConnectionId,
        request_id: u64,
        room_code: String,
        player_name: String,
        password: Option<String>,
        as_spectator: bool,
    ) {
        let fail = |error: String| ServerMessage::JoinRoomResult {
            request_id,
            success: false,
            room_code: None,
            player_id: None,
            error: Some(error),
        };

        if room_code.trim().is_empty() {
            self.send_to(connection_id, fail("Room code is required".to_string()))
                .await;
            return;
        }
        if player_name.trim().is_empty() {
            self.send_to(connection_id, fail("Player name is required".to_string()))
                .await;
            return;
        }

        let joined = self
            .store
            .join(
                &room_code,
                connection_id.clone(),
                &player_name,
                password.as_deref(),
                as_spectator,
            )
            .await;

        match joined {
            Err(e) => {
                self.send_to(connection_id, fail(e.to_string())).await;
            }
            Ok((room, player_id)) => {
                let code = room_code.trim().to_uppercase();
                self.send_to(
                    connection_id,
                    ServerMessage::JoinRoomResult {
                        request_id,
                        success: true,
                        room_code: Some(code.clone()),
                        player_id: Some(player_id.to_string()),
                        error: None,
                    },
                )
                .await;

                let out = {
                    let guard = room.read().await;
                    engine::after_join(&guard, &player_id)
                };
                self.apply_output(&code, out).await;
            }
        }
    }

    async fn handle_reconnect(
        &self,
        connection_id: &ConnectionId,
        request_id: u64,
        player_id: String,
    ) {
        let player_id = PlayerId::from_string(player_id);
        match self
            .store
            .reconnect(&player_id, connection_id.clone())
            .await
        {
            Err(e) => {
                self.send_to(
                    connection_id,
                    ServerMessage::ReconnectResult {
                        request_id,
                        success: false,
                        room_code: None,
                        error: Some(e.to_string()),
                    },
                )
                .await;
            }
            Ok((room, code)) => {
                self.send_to(
                    connection_id,
                    ServerMessage::ReconnectResult {
                        request_id,
                        success: true,
                        room_code: Some(code.clone()),
                        error: None,
                    },
                )
                .await;

                let out = {
                    let guard = room.read().await;
                    engine::after_reconnect(&guard, &player_id)
                };
                self.apply_output(&code, out).await;
            }
        }
    }

    async fn handle_set_password(
        &self,
        connection_id: &ConnectionId,
        request_id: u64,
        password: Option<String>,
    ) {
        let ack = |success: bool, error: Option<String>| ServerMessage::SetPasswordResult {
            request_id,
            success,
            error,
        };

        let Some((player_id, _room, code)) = self.resolve(connection_id).await else {
            self.send_to(connection_id, ack(false, Some("Not in a room".to_string())))
                .await;
            return;
        };

        match self.store.set_password(&code, &player_id, password).await {
            Ok(()) => self.send_to(connection_id, ack(true, None)).await,
            Err(e) => {
                self.send_to(connection_id, ack(false, Some(e.to_string())))
                    .await
            }
        }
    }

    /// Transport dropped: mark the player AFK and advise the room.
    async fn on_disconnect(&self, connection_id: &ConnectionId) {
        let Some((room, player_id)) = self.store.handle_disconnect(connection_id).await else {
            return;
        };
        let (code, out) = {
            let guard = room.read().await;
            (guard.code.clone(), engine::after_disconnect(&guard, &player_id))
        };
        self.apply_output(&code, out).await;
    }

    // =========================================================================
    // OUTPUT APPLICATION AND TIMERS
    // =========================================================================

    /// Apply an engine output: timer work first, then best-effort sends,
    /// then global-leaderboard settlements. The room lock is already
    /// released by the time this runs.
    async fn apply_output(&self, code: &str, out: EngineOutput) {
        if out.cancel_timers {
            if let Some(mut timers) = self.timers.write().await.remove(code) {
                timers.abort_all();
            }
        }
        if let Some(cmd) = out.timer {
            self.arm_timer(code, cmd).await;
        }

        for push in out.pushes {
            self.send_to(&push.connection, push.message).await;
        }

        for settlement in out.settlements {
            self.store
                .update_global(&settlement.player_id, &settlement.name, settlement.points)
                .await;
        }
    }

    /// Arm a timer, replacing (and aborting) the previous one of its
    /// class. The fired task revalidates room state before acting.
    ///
    /// Explicitly boxed (rather than a plain `async fn`) because the
    /// spawned tasks call back into `on_turn_timeout`/`on_offer_pause`/
    /// `on_offer_timeout`, which call `apply_output`, which calls this
    /// function again — an opaque `impl Future` here would make that
    /// cycle un-checkable for `Send`.
    fn arm_timer<'a>(
        &'a self,
        code: &'a str,
        cmd: TimerCommand,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let mut timers = self.timers.write().await;
        let entry = timers.entry(code.to_string()).or_default();

        match cmd {
            TimerCommand::ArmTurn {
                player_id,
                deadline_ms,
            } => {
                if let Some(h) = entry.turn.take() {
                    h.abort();
                }
                let server = self.clone();
                let code = code.to_string();
                entry.turn = Some(tokio::spawn(async move {
                    sleep_until_ms(deadline_ms).await;
                    server.on_turn_timeout(&code, player_id, deadline_ms).await;
                }));
            }
            TimerCommand::ArmOfferPause { round } => {
                // The turn is over; its pending deadline must not fire
                if let Some(h) = entry.turn.take() {
                    h.abort();
                }
                if let Some(h) = entry.offer.take() {
                    h.abort();
                }
                let server = self.clone();
                let code = code.to_string();
                entry.offer = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(OFFER_PAUSE_MS)).await;
                    server.on_offer_pause(&code, round).await;
                }));
            }
            TimerCommand::ArmOffer { deadline_ms } => {
                if let Some(h) = entry.offer.take() {
                    h.abort();
                }
                let server = self.clone();
                let code = code.to_string();
                entry.offer = Some(tokio::spawn(async move {
                    sleep_until_ms(deadline_ms).await;
                    server.on_offer_timeout(&code, deadline_ms).await;
                }));
            }
        }
        })
    }

    async fn on_turn_timeout(&self, code: &str, player_id: PlayerId, deadline_ms: u64) {
        let Some(room) = self.store.room(code).await else {
            return;
        };
        let out = {
            let mut guard = room.write().await;
            engine::handle_turn_timeout(&mut guard, &player_id, deadline_ms, now_millis())
        };
        self.apply_output(code, out).await;
    }

    async fn on_offer_pause(&self, code: &str, round: u32) {
        let Some(room) = self.store.room(code).await else {
            return;
        };
        let out = {
            let mut guard = room.write().await;
            engine::handle_offer_pause(&mut guard, round, now_millis())
        };
        self.apply_output(code, out).await;
    }

    async fn on_offer_timeout(&self, code: &str, deadline_ms: u64) {
        let Some(room) = self.store.room(code).await else {
            return;
        };
        let out = {
            let mut guard = room.write().await;
            engine::handle_offer_timeout(&mut guard, deadline_ms, now_millis())
        };
        self.apply_output(code, out).await;
    }

    // =========================================================================
    // CLEANUP WORKER
    // =========================================================================

    /// Periodic TTL sweep over terminal and idle rooms.
    async fn run_cleanup_loop(&self) {
        let mut ticker = interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let deleted = self.store.sweep(Instant::now()).await;
            if !deleted.is_empty() {
                let mut timers = self.timers.write().await;
                for code in &deleted {
                    if let Some(mut entry) = timers.remove(code) {
                        entry.abort_all();
                    }
                }
                info!("Cleanup removed {} stale room(s)", deleted.len());
            }
        }
    }
}

/// Sleep until a wall-clock deadline, returning immediately when past.
async fn sleep_until_ms(deadline_ms: u64) {
    let now = now_millis();
    tokio::time::sleep(Duration::from_millis(deadline_ms.saturating_sub(now))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::TURN_TIMEOUT_MS;
    use crate::game::state::GamePhase;
    use tokio::sync::mpsc::Receiver;

    fn test_server() -> GameServer {
        GameServer::new(ServerConfig::default())
    }

    /// Register a synthetic connection and return its id plus receiver.
    async fn connect(server: &GameServer) -> (ConnectionId, Receiver<ServerMessage>) {
        let connection_id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(64);
        server.store.register_connection(connection_id.clone(), tx).await;
        (connection_id, rx)
    }

    fn drain(rx: &mut Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Drive create-room through dispatch, returning (code, player_id).
    async fn create_room(
        server: &GameServer,
        conn: &ConnectionId,
        rx: &mut Receiver<ServerMessage>,
        name: &str,
    ) -> (String, String) {
        server
            .dispatch(
                conn,
                ClientMessage::CreateRoom {
                    request_id: 1,
                    player_name: name.to_string(),
                },
            )
            .await;
        let msgs = drain(rx);
        match &msgs[0] {
            ServerMessage::CreateRoomResult {
                success: true,
                room_code: Some(code),
                player_id: Some(pid),
                ..
            } => (code.clone(), pid.clone()),
            other => panic!("Unexpected ack: {other:?}"),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.cleanup_interval, CLEANUP_INTERVAL);
        assert!(config.origin_allowed(Some("http://anywhere.example")));
    }

    #[test]
    fn test_origin_allowlist() {
        let config = ServerConfig {
            cors_origins: vec!["https://game.example".to_string()],
            ..Default::default()
        };
        assert!(config.origin_allowed(Some("https://game.example")));
        assert!(!config.origin_allowed(Some("https://evil.example")));
        // Non-browser clients carry no Origin header
        assert!(config.origin_allowed(None));
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("PORT", "9999");
        std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        std::env::set_var("ROOM_FINISHED_TTL_MS", "60000");
        std::env::set_var("ROOM_WAITING_TTL_MS", "not-a-number");

        let config = ServerConfig::from_env();
        assert_eq!(config.bind_addr.port(), 9999);
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.store.finished_ttl, Duration::from_millis(60000));
        // malformed value falls back to the default
        assert_eq!(config.store.waiting_ttl, StoreConfig::default().waiting_ttl);

        for var in [
            "PORT",
            "CORS_ORIGINS",
            "ROOM_FINISHED_TTL_MS",
            "ROOM_WAITING_TTL_MS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    async fn test_create_room_acks_and_snapshots() {
        let server = test_server();
        let (conn, mut rx) = connect(&server).await;

        server
            .dispatch(
                &conn,
                ClientMessage::CreateRoom {
                    request_id: 42,
                    player_name: "Host".to_string(),
                },
            )
            .await;

        let msgs = drain(&mut rx);
        assert!(matches!(
            msgs[0],
            ServerMessage::CreateRoomResult {
                request_id: 42,
                success: true,
                ..
            }
        ));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::GameStateUpdate(_))));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::LeaderboardUpdate { .. })));
    }

    #[tokio::test]
    async fn test_create_room_requires_name() {
        let server = test_server();
        let (conn, mut rx) = connect(&server).await;

        server
            .dispatch(
                &conn,
                ClientMessage::CreateRoom {
                    request_id: 1,
                    player_name: "   ".to_string(),
                },
            )
            .await;

        let msgs = drain(&mut rx);
        match &msgs[0] {
            ServerMessage::CreateRoomResult {
                success: false,
                error: Some(e),
                ..
            } => assert_eq!(e, "Player name is required"),
            other => panic!("Unexpected ack: {other:?}"),
        }
        assert_eq!(server.store.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_unknown_room_acks_error() {
        let server = test_server();
        let (conn, mut rx) = connect(&server).await;

        server
            .dispatch(
                &conn,
                ClientMessage::JoinRoom {
                    request_id: 2,
                    room_code: "ZZZZZZ".to_string(),
                    player_name: "Guest".to_string(),
                    password: None,
                    as_spectator: None,
                },
            )
            .await;

        let msgs = drain(&mut rx);
        match &msgs[0] {
            ServerMessage::JoinRoomResult {
                success: false,
                error: Some(e),
                ..
            } => assert_eq!(e, "Room not found"),
            other => panic!("Unexpected ack: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_broadcasts_to_everyone() {
        let server = test_server();
        let (host_conn, mut host_rx) = connect(&server).await;
        let (code, _) = create_room(&server, &host_conn, &mut host_rx, "Host").await;

        let (guest_conn, mut guest_rx) = connect(&server).await;
        server
            .dispatch(
                &guest_conn,
                ClientMessage::JoinRoom {
                    request_id: 3,
                    room_code: code.to_lowercase(),
                    player_name: "Guest".to_string(),
                    password: None,
                    as_spectator: None,
                },
            )
            .await;

        // Host saw the new roster
        assert!(drain(&mut host_rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::GameStateUpdate(_))));

        let guest_msgs = drain(&mut guest_rx);
        assert!(matches!(
            guest_msgs[0],
            ServerMessage::JoinRoomResult { success: true, .. }
        ));
        assert!(guest_msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::LeaderboardUpdate { .. })));
    }

    #[tokio::test]
    async fn test_reconnect_preserves_identity() {
        let server = test_server();
        let (conn, mut rx) = connect(&server).await;
        let (code, player_id) = create_room(&server, &conn, &mut rx, "Host").await;

        server.on_disconnect(&conn).await;
        assert_eq!(server.store.room_count().await, 1);

        let (new_conn, mut new_rx) = connect(&server).await;
        server
            .dispatch(
                &new_conn,
                ClientMessage::ReconnectPlayer {
                    request_id: 5,
                    player_id: player_id.clone(),
                },
            )
            .await;

        let msgs = drain(&mut new_rx);
        match &msgs[0] {
            ServerMessage::ReconnectResult {
                success: true,
                room_code: Some(rejoined),
                ..
            } => assert_eq!(rejoined, &code),
            other => panic!("Unexpected ack: {other:?}"),
        }
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::GameStateUpdate(_))));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::LeaderboardUpdate { .. })));
    }

    #[tokio::test]
    async fn test_reconnect_unknown_player_acks_error() {
        let server = test_server();
        let (conn, mut rx) = connect(&server).await;

        server
            .dispatch(
                &conn,
                ClientMessage::ReconnectPlayer {
                    request_id: 6,
                    player_id: "ghost".to_string(),
                },
            )
            .await;

        let msgs = drain(&mut rx);
        match &msgs[0] {
            ServerMessage::ReconnectResult {
                success: false,
                error: Some(e),
                ..
            } => assert_eq!(e, "Player not found"),
            other => panic!("Unexpected ack: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_game_event_without_room_is_dropped() {
        let server = test_server();
        let (conn, mut rx) = connect(&server).await;

        server
            .dispatch(&conn, ClientMessage::OpenBox { box_number: 3 })
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_timer_fires_and_skips_player() {
        let server = test_server();
        let (host_conn, mut host_rx) = connect(&server).await;
        let (code, _) = create_room(&server, &host_conn, &mut host_rx, "Host").await;

        let (guest_conn, mut guest_rx) = connect(&server).await;
        server
            .dispatch(
                &guest_conn,
                ClientMessage::JoinRoom {
                    request_id: 1,
                    room_code: code.clone(),
                    player_name: "Guest".to_string(),
                    password: None,
                    as_spectator: None,
                },
            )
            .await;

        server
            .dispatch(&host_conn, ClientMessage::SelectBox { box_number: 1 })
            .await;
        server
            .dispatch(&guest_conn, ClientMessage::SelectBox { box_number: 20 })
            .await;
        server.dispatch(&host_conn, ClientMessage::PlayerReady).await;
        server.dispatch(&guest_conn, ClientMessage::PlayerReady).await;
        server.dispatch(&host_conn, ClientMessage::StartGame).await;

        let room = server.store.room(&code).await.unwrap();
        let first = {
            let guard = room.read().await;
            assert_eq!(guard.phase, GamePhase::Playing);
            guard.current_turn_player.clone().unwrap()
        };

        // Nobody acts; virtual time runs past the deadline
        tokio::time::sleep(Duration::from_millis(TURN_TIMEOUT_MS + 2_000)).await;

        let guard = room.read().await;
        let skipped = guard.player(&first).unwrap();
        assert_eq!(skipped.timeout_count, 1);
        assert_ne!(guard.current_turn_player.as_ref(), Some(&first));
        assert!(guard.current_turn_player.is_some());
        drop(guard);

        drain(&mut host_rx);
        drain(&mut guest_rx);
    }
}

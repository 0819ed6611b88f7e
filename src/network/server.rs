//! Ledger Gateway
//!
//! Async WebSocket front end for the voting ledger. Authority connections
//! authenticate with a JWT before administering elections; voters submit
//! ballots anonymously. Request handling is a plain async function so it can
//! be exercised without sockets.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::ledger::service::LedgerService;
use crate::ledger::state::{aggregate_root, LedgerError};
use crate::ledger::types::Principal;
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::protocol::{ErrorCode, Request, Response};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close connections idle for this long.
    pub idle_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Per-connection state.
#[derive(Debug, Default, Clone)]
pub struct ConnectionState {
    /// Principal established by `authenticate`.
    pub principal: Option<Principal>,
}

/// Bookkeeping for a live connection. Inserted when the TCP connection is
/// accepted, before the WebSocket handshake.
struct ConnectedClient {
    connection_id: Uuid,
    connected_at: Instant,
}

/// Handle one request against the ledger.
pub async fn handle_request(
    service: &LedgerService,
    auth: &AuthConfig,
    conn: &mut ConnectionState,
    request: Request,
) -> Response {
    if let Request::Authenticate { token } = &request {
        return match authenticate(token, auth) {
            Ok(principal) => {
                debug!("Connection authenticated as {}", principal);
                conn.principal = Some(principal);
                Response::Authenticated { principal: principal.to_string() }
            }
            Err(e) => {
                warn!("Authentication failed: {}", e);
                Response::from(e)
            }
        };
    }

    let caller = match (request.requires_authority(), conn.principal) {
        (true, None) => {
            return Response::error(ErrorCode::NotAuthenticated, "authenticate before administering elections");
        }
        (_, principal) => principal,
    };

    match dispatch(service, caller, request).await {
        Ok(response) => response,
        Err(e) => {
            if e.is_fatal() {
                error!("Integrity failure: {}", e);
            }
            Response::from(e)
        }
    }
}

async fn dispatch(
    service: &LedgerService,
    caller: Option<Principal>,
    request: Request,
) -> Result<Response, LedgerError> {
    let authority = || caller.ok_or(LedgerError::Unauthorized);

    let response = match request {
        Request::Authenticate { .. } => Response::error(ErrorCode::InvalidRequest, "already handled"),

        Request::CreateElection { title, start_time, end_time, candidates_root } => {
            let election_id = service
                .create_election(&authority()?, &title, start_time, end_time, candidates_root)
                .await?;
            Response::ElectionCreated { election_id }
        }

        Request::OpenElection { election_id } => {
            service.open_election(&authority()?, election_id).await?;
            Response::ElectionOpened { election_id }
        }

        Request::CloseElection { election_id } => {
            service.close_election(&authority()?, election_id).await?;
            let total_votes = service
                .election(election_id)
                .await
                .map(|e| e.total_votes)
                .unwrap_or_default();
            Response::ElectionClosed { election_id, total_votes }
        }

        Request::RegisterToken { election_id, token_hash } => {
            service.register_token(&authority()?, election_id, token_hash).await?;
            Response::TokenRegistered { election_id, token_hash }
        }

        Request::CastVote { election_id, token_hash, encrypted_ballot } => {
            let receipt = service.cast_vote(election_id, token_hash, &encrypted_ballot).await?;
            Response::VoteAccepted { receipt }
        }

        Request::VerifyVoteInclusion { election_id, vote_hash } => {
            let inclusion = service.verify_vote_inclusion(election_id, &vote_hash).await;
            Response::VoteInclusion { election_id, vote_hash, inclusion }
        }

        Request::ListVoteHashes { election_id } => {
            let vote_hashes = service.list_vote_hashes(election_id).await;
            Response::VoteHashes {
                election_id,
                aggregate_root: aggregate_root(&vote_hashes),
                vote_hashes,
            }
        }

        Request::GetElection { election_id } => {
            let election = service
                .election(election_id)
                .await
                .ok_or(LedgerError::ElectionNotFound(election_id))?;
            Response::Election { election }
        }

        Request::Ping { timestamp } => Response::Pong {
            timestamp,
            server_time: service.now(),
        },
    };

    Ok(response)
}

/// WebSocket gateway over a ledger service.
pub struct LedgerGateway {
    config: GatewayConfig,
    service: LedgerService,
    auth: Arc<AuthConfig>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LedgerGateway {
    /// Create a gateway.
    pub fn new(config: GatewayConfig, service: LedgerService, auth: AuthConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            auth: Arc::new(auth),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Ledger gateway listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if !self.reserve_slot(addr).await {
                                warn!("Connection limit reached, rejecting {}", addr);
                                Self::reject_full(stream, addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
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

        Ok(())
    }

    /// Claim a connection slot under the write lock.
    async fn reserve_slot(&self, addr: SocketAddr) -> bool {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.config.max_connections {
            return false;
        }
        clients.insert(addr, ConnectedClient {
            connection_id: Uuid::new_v4(),
            connected_at: Instant::now(),
        });
        true
    }

    /// Complete the handshake only to tell the client the server is full.
    fn reject_full(stream: TcpStream, addr: SocketAddr) {
        tokio::spawn(async move {
            let mut ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("Handshake with rejected client {} failed: {}", addr, e);
                    return;
                }
            };

            let response = Response::error(ErrorCode::ServerFull, "connection limit reached");
            if let Ok(text) = response.to_json() {
                let _ = ws_stream.send(Message::Text(text)).await;
            }
            let _ = ws_stream.close(None).await;
        });
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let service = self.service.clone();
        let auth = self.auth.clone();
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    clients.write().await.remove(&addr);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Response>(64);

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize response: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut conn = ConnectionState::default();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let response = match Request::from_json(&text) {
                                    Ok(request) => handle_request(&service, &auth, &mut conn, request).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        Response::error(ErrorCode::InvalidRequest, "invalid message format")
                                    }
                                };
                                if msg_tx.send(response).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = tokio::time::sleep(idle_timeout) => {
                        info!("Closing idle connection {}", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            drop(msg_tx);
            let _ = sender_task.await;

            let removed = clients.write().await.remove(&addr);
            if let Some(client) = removed {
                info!(
                    "Connection {} ({}) closed after {:?}",
                    client.connection_id,
                    addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Stop accepting and close all connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::hash::Hash32;
    use crate::network::auth::tests::{config, token_for};

    const T0: u64 = 1_700_000_000;

    fn service(clock: &Arc<ManualClock>) -> LedgerService {
        LedgerService::new(Principal::from_subject("registrar"), clock.clone())
    }

    async fn authed(service: &LedgerService, subject: &str) -> ConnectionState {
        let mut conn = ConnectionState::default();
        let response = handle_request(
            service,
            &config(),
            &mut conn,
            Request::Authenticate { token: token_for(subject, 3600) },
        )
        .await;
        assert!(matches!(response, Response::Authenticated { .. }));
        conn
    }

    async fn next_response<S>(ws: &mut S) -> Response
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break Response::from_json(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_authority_requests_need_auth() {
        let clock = Arc::new(ManualClock::new(T0));
        let service = service(&clock);
        let mut conn = ConnectionState::default();

        let response = handle_request(
            &service,
            &config(),
            &mut conn,
            Request::OpenElection { election_id: 1 },
        )
        .await;

        assert!(matches!(
            response,
            Response::Error(ref e) if e.code == ErrorCode::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn test_non_authority_is_unauthorized() {
        let clock = Arc::new(ManualClock::new(T0));
        let service = service(&clock);
        let mut conn = authed(&service, "someone-else").await;

        let response = handle_request(
            &service,
            &config(),
            &mut conn,
            Request::CreateElection {
                title: "x".into(),
                start_time: T0 + 10,
                end_time: T0 + 20,
                candidates_root: Hash32::ZERO,
            },
        )
        .await;

        assert!(matches!(
            response,
            Response::Error(ref e) if e.code == ErrorCode::Unauthorized
        ));
    }

    #[tokio::test]
    async fn test_full_flow_over_requests() {
        let clock = Arc::new(ManualClock::new(T0));
        let service = service(&clock);
        let auth = config();
        let mut admin = authed(&service, "registrar").await;
        let mut voter = ConnectionState::default();
        let token = Hash32([7; 32]);

        let created = handle_request(&service, &auth, &mut admin, Request::CreateElection {
            title: "Budget".into(),
            start_time: T0 + 10,
            end_time: T0 + 100,
            candidates_root: Hash32([1; 32]),
        })
        .await;
        assert_eq!(created, Response::ElectionCreated { election_id: 1 });

        handle_request(&service, &auth, &mut admin, Request::OpenElection { election_id: 1 }).await;
        handle_request(&service, &auth, &mut admin, Request::RegisterToken { election_id: 1, token_hash: token }).await;
        clock.set(T0 + 50);

        let cast = Request::CastVote { election_id: 1, token_hash: token, encrypted_ballot: vec![1, 2, 3] };
        let receipt = match handle_request(&service, &auth, &mut voter, cast.clone()).await {
            Response::VoteAccepted { receipt } => receipt,
            other => panic!("unexpected response: {other:?}"),
        };

        let again = handle_request(&service, &auth, &mut voter, cast).await;
        assert!(matches!(again, Response::Error(ref e) if e.code == ErrorCode::TokenAlreadyUsed));

        let inclusion = handle_request(&service, &auth, &mut voter, Request::VerifyVoteInclusion {
            election_id: 1,
            vote_hash: receipt.vote_hash,
        })
        .await;
        assert!(matches!(inclusion, Response::VoteInclusion { inclusion, .. } if inclusion.exists));

        let listed = handle_request(&service, &auth, &mut voter, Request::ListVoteHashes { election_id: 1 }).await;
        assert_eq!(listed, Response::VoteHashes {
            election_id: 1,
            vote_hashes: vec![receipt.vote_hash],
            aggregate_root: aggregate_root(&[receipt.vote_hash]),
        });

        let closed = handle_request(&service, &auth, &mut admin, Request::CloseElection { election_id: 1 }).await;
        assert_eq!(closed, Response::ElectionClosed { election_id: 1, total_votes: 1 });
    }

    #[tokio::test]
    async fn test_unknown_election_lookup() {
        let clock = Arc::new(ManualClock::new(T0));
        let service = service(&clock);
        let response = handle_request(
            &service,
            &config(),
            &mut ConnectionState::default(),
            Request::GetElection { election_id: 4 },
        )
        .await;
        assert!(matches!(response, Response::Error(ref e) if e.code == ErrorCode::ElectionNotFound));
    }

    #[tokio::test]
    async fn test_websocket_ping() {
        let clock = Arc::new(ManualClock::new(T0));
        let gateway = Arc::new(LedgerGateway::new(GatewayConfig::default(), service(&clock), config()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = gateway.clone();
        let handle = tokio::spawn(async move { server.serve(listener).await });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        ws.send(Message::Text(Request::Ping { timestamp: 42 }.to_json().unwrap())).await.unwrap();

        let reply = next_response(&mut ws).await;
        assert_eq!(reply, Response::Pong { timestamp: 42, server_time: T0 });

        ws.send(Message::Text("not json".into())).await.unwrap();
        let reply = next_response(&mut ws).await;
        assert!(matches!(reply, Response::Error(ref e) if e.code == ErrorCode::InvalidRequest));

        gateway.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_replies_server_full() {
        let clock = Arc::new(ManualClock::new(T0));
        let gateway_config = GatewayConfig { max_connections: 1, ..GatewayConfig::default() };
        let gateway = Arc::new(LedgerGateway::new(gateway_config, service(&clock), config()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = gateway.clone();
        let handle = tokio::spawn(async move { server.serve(listener).await });

        let (mut first, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        first.send(Message::Text(Request::Ping { timestamp: 1 }.to_json().unwrap())).await.unwrap();
        assert!(matches!(next_response(&mut first).await, Response::Pong { .. }));
        assert_eq!(gateway.connection_count().await, 1);

        let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let reply = next_response(&mut second).await;
        assert!(matches!(reply, Response::Error(ref e) if e.code == ErrorCode::ServerFull));
        assert_eq!(gateway.connection_count().await, 1);

        // the slot frees once the first client leaves
        first.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while gateway.connection_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let (mut third, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        third.send(Message::Text(Request::Ping { timestamp: 3 }.to_json().unwrap())).await.unwrap();
        assert!(matches!(next_response(&mut third).await, Response::Pong { timestamp: 3, .. }));

        gateway.shutdown();
        handle.await.unwrap().unwrap();
    }
}

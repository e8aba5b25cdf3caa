//! Intake WebSocket server.
//!
//! Listens on a TCP port, upgrades every connection to WebSocket and serves
//! each client independently until shutdown.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use formupload_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection::{self, ClientConnection, ClientMeta};
use crate::handler::Handler;

type ConnectionMap = Arc<std::sync::Mutex<HashMap<String, ClientConnection>>>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

/// The intake WebSocket server.
pub struct IntakeServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: ConnectionMap,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl<H: Handler> IntakeServer<H> {
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            connections: Arc::new(std::sync::Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        let mut conns = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        conns.retain(|_, c| !c.is_finished());
        conns.len()
    }

    /// Returns a token that is cancelled when the server shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("intake server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn close_all(&self) {
        let conns: Vec<ClientConnection> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, c)| c)
            .collect();
        for conn in conns {
            conn.close_and_wait().await;
        }
    }

    /// Upgrades one TCP connection to WebSocket and starts its pumps.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let meta = ClientMeta {
            conn_id: uuid::Uuid::new_v4().to_string(),
            remote_addr: peer_addr.to_string(),
        };
        tracing::debug!(conn_id = %meta.conn_id, %peer_addr, "WebSocket connection established");

        let registry = Arc::downgrade(&self.connections);
        let conn = connection::spawn_connection(
            ws_stream,
            meta.clone(),
            Arc::clone(&self.handler),
            self.cancel.clone(),
            move |meta: &ClientMeta| {
                if let Some(conns) = registry.upgrade() {
                    conns
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&meta.conn_id);
                }
            },
        );

        // A shutdown that started during the upgrade already drained the map.
        if self.cancel.is_cancelled() {
            conn.close();
            return Ok(());
        }
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(meta.conn_id, conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Sender;
    use crate::handler::HandlerFuture;
    use formupload_protocol::envelope::Message;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Minimal test handler.
    #[derive(Default)]
    struct TestHandler {
        connected: AtomicUsize,
        creates: AtomicUsize,
    }

    impl Handler for TestHandler {
        fn on_client_connected(&self, _meta: ClientMeta) -> HandlerFuture<'_> {
            self.connected.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }

        fn on_create_application(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let _ = sender.send_error(&msg, 418, "test");
            })
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }

    async fn start() -> (Arc<IntakeServer<TestHandler>>, tokio::task::JoinHandle<()>) {
        let server = IntakeServer::new(local_config(), TestHandler::default());
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (server, handle)
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let (server, handle) = start().await;
        assert!(server.port().await > 0, "should have bound to a dynamic port");
        assert_eq!(server.connection_count(), 0);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let (server, handle) = start().await;
        let err = server.run().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning));
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_serves_several_clients() {
        let (server, handle) = start().await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);

        let (ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count(), 2);
        assert_eq!(server.handler().connected.load(Ordering::SeqCst), 2);

        drop(ws1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.connection_count(), 1);

        drop(ws2);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_dispatches_text_message() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let (server, handle) = start().await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let msg = serde_json::json!({
            "id": "test-1",
            "type": "create_application",
            "payload": { "name": "Ada", "documentCount": 1 }
        });
        ws.send(WsMessage::Text(msg.to_string().into())).await.unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break serde_json::from_str::<Message>(&text).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(reply.id, "test-1");
        assert_eq!(reply.error.unwrap().code, 418);
        assert_eq!(server.handler().creates.load(Ordering::SeqCst), 1);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unimplemented_request_gets_501() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let (server, handle) = start().await;
        let url = format!("ws://127.0.0.1:{}", server.port().await);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let msg = serde_json::json!({
            "id": "s-1",
            "type": "get_status",
            "payload": { "applicationId": "APP-1" }
        });
        ws.send(WsMessage::Text(msg.to_string().into())).await.unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => break serde_json::from_str::<Message>(&text).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(reply.error.unwrap().code, 501);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }
}

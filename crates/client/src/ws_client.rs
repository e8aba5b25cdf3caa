//! WebSocket client for the intake API.
//!
//! Implements request/response over one connection with UUID correlation
//! and a read deadline that any inbound frame refreshes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use formupload_protocol::constants::{
    MessageType, WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT, WS_REQUEST_TIMEOUT,
};
use formupload_protocol::envelope::Message;
use formupload_protocol::messages::{
    ApplicationCreatedResponse, CreateApplicationRequest, DocumentsCompleteRequest,
    DocumentsCompleteResponse, DocumentsRequest, DocumentsResponse, StatusRequest, StatusResponse,
};

use crate::api::{ApiFuture, ApplicationApi};
use crate::error::ClientError;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

/// WebSocket client connected to one intake server.
pub struct WsApiClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    request_timeout: Duration,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
}

impl WsApiClient {
    /// Connects to the intake server at `url` (`ws://host:port`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(write_pump(write, write_rx, cancel.clone()));
        let read_handle = tokio::spawn(read_pump(
            read,
            Arc::clone(&pending),
            write_tx.clone(),
            cancel.clone(),
        ));

        debug!(url, "connected to intake server");
        Ok(Self {
            write_tx,
            pending,
            request_timeout: WS_REQUEST_TIMEOUT,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
        })
    }

    /// Overrides the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sends a request and waits for the reply with the same id. An `error`
    /// reply becomes [`ClientError::Api`].
    pub async fn send_request<T: serde::Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if self
            .write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Closed);
        }

        let result = tokio::time::timeout(self.request_timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => match resp.error {
                Some(err) => Err(ClientError::Api {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(resp),
            },
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn call<Req, Resp>(&self, msg_type: MessageType, req: &Req) -> Result<Resp, ClientError>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let resp = self.send_request(msg_type, Some(req)).await?;
        Ok(resp.require_payload()?)
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }
}

impl Drop for WsApiClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}

impl ApplicationApi for WsApiClient {
    fn create_application<'a>(
        &'a self,
        req: &'a CreateApplicationRequest,
    ) -> ApiFuture<'a, ApplicationCreatedResponse> {
        Box::pin(self.call(MessageType::CreateApplication, req))
    }

    fn documents_complete<'a>(
        &'a self,
        req: &'a DocumentsCompleteRequest,
    ) -> ApiFuture<'a, DocumentsCompleteResponse> {
        Box::pin(self.call(MessageType::DocumentsComplete, req))
    }

    fn get_status<'a>(&'a self, req: &'a StatusRequest) -> ApiFuture<'a, StatusResponse> {
        Box::pin(self.call(MessageType::GetStatus, req))
    }

    fn get_documents<'a>(&'a self, req: &'a DocumentsRequest) -> ApiFuture<'a, DocumentsResponse> {
        Box::pin(self.call(MessageType::GetDocuments, req))
    }
}

/// Drains the outbound channel into the socket.
async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: futures_util::Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let closing = matches!(msg, tungstenite::Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    warn!("WebSocket write error: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        }
    }
}

/// Routes replies to their pending requests and answers server pings.
async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("no traffic from intake server, closing");
                break;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => route_reply(&text, &pending).await,
                    tungstenite::Message::Ping(data) => {
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Close(_) => {
                        debug!("received close frame");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Fail outstanding requests fast instead of letting them time out.
    pending.lock().await.clear();
}

async fn route_reply(text: &str, pending: &PendingMap) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };
    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    match pending.lock().await.remove(&msg.id) {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => warn!(id = %msg.id, "reply for unknown request, dropping"),
    }
}

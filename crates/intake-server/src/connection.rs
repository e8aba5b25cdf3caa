//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::sync::Arc;

use formupload_protocol::constants::{
    MessageType, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT, WS_WRITE_WAIT,
};
use formupload_protocol::envelope::Message;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Metadata about a connected client.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub conn_id: String,
    pub remote_addr: String,
}

/// Handle for sending messages to one client.
///
/// Cloneable and cheap, wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` only if the buffer is full or the client is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to one client.
pub struct ClientConnection {
    pub meta: ClientMeta,
    sender: Sender,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals both pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Signals shutdown and waits for the read pump and the disconnect hook.
    pub async fn close_and_wait(self) {
        self.cancel.cancel();
        let _ = self.reader.await;
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tasks and stop when the client goes away or
/// the server token is cancelled. `on_closed` runs after the handler's
/// disconnect hook.
pub fn spawn_connection<S, H, F>(
    ws_stream: S,
    meta: ClientMeta,
    handler: Arc<H>,
    server_cancel: CancellationToken,
    on_closed: F,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
    F: FnOnce(&ClientMeta) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    let read_sender = sender.clone();
    let read_meta = meta.clone();
    let reader = tokio::spawn(async move {
        handler.on_client_connected(read_meta.clone()).await;
        read_pump(ws_stream, read_sender, Arc::clone(&handler), read_cancel.clone()).await;
        // The write pump follows the read pump down.
        read_cancel.cancel();
        handler.on_client_disconnected(read_meta.clone()).await;
        on_closed(&read_meta);
        tracing::info!(conn_id = %read_meta.conn_id, remote = %read_meta.remote_addr, "client disconnected");
    });

    ClientConnection {
        meta,
        sender,
        cancel,
        reader,
    }
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.reset();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => match msg {
                Some(ws_msg) => ws_msg,
                None => break,
            },

            _ = ping_interval.tick() => WsMessage::Ping(Vec::new().into()),
        };

        match tokio::time::timeout(WS_WRITE_WAIT, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("write pump send error: {e}");
                break;
            }
            Err(_) => {
                tracing::warn!("write timed out, closing connection");
                break;
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
///
/// Any inbound frame counts as liveness; the connection is dropped when a
/// full pong window passes in silence.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    // Handlers are awaited inline; ticks missed while one runs must not
    // fire back to back afterwards.
    pong_deadline.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    pong_deadline.reset();
    let mut alive = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !alive {
                    tracing::warn!("pong timeout, closing connection");
                    break;
                }
                alive = false;
            }

            frame = stream.next() => {
                let ws_msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                };
                alive = true;
                match ws_msg {
                    WsMessage::Text(text) => {
                        if text.len() > WS_MAX_MESSAGE_SIZE {
                            tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                            continue;
                        }
                        dispatch_text(&handler, &sender, &text).await;
                    }
                    WsMessage::Binary(data) => {
                        tracing::warn!(len = data.len(), "binary frames are not part of the API, ignoring");
                    }
                    WsMessage::Pong(_) => pong_deadline.reset(),
                    WsMessage::Ping(data) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    WsMessage::Close(_) => {
                        tracing::debug!("received close frame");
                        break;
                    }
                    WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the matching handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        MessageType::Ping => handler.on_ping(s, msg).await,
        MessageType::CreateApplication => handler.on_create_application(s, msg).await,
        MessageType::DocumentsComplete => handler.on_documents_complete(s, msg).await,
        MessageType::GetStatus => handler.on_get_status(s, msg).await,
        MessageType::GetDocuments => handler.on_get_documents(s, msg).await,
        MessageType::UploadCreate => handler.on_upload_create(s, msg).await,
        MessageType::UploadFinished => handler.on_upload_finished(s, msg).await,
        MessageType::UploadTerminated => handler.on_upload_terminated(s, msg).await,
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, 501, "unknown message type");
        }
    }
}

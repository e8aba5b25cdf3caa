//! Handler trait for processing API requests.
//!
//! Implementors provide the application logic while the server framework
//! handles connections, framing and routing.

use std::future::Future;
use std::pin::Pin;

use formupload_protocol::MessageType;
use formupload_protocol::envelope::Message;

use crate::connection::{ClientMeta, Sender};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling requests from a client.
///
/// Each request method receives the `sender` to reply on and the parsed
/// envelope. Replies must reuse the request id (see [`Message::reply`]).
/// Default implementations reply with 501 so handlers only override the
/// requests they serve.
pub trait Handler: Send + Sync + 'static {
    /// Called once a client's WebSocket upgrade completes.
    fn on_client_connected(&self, meta: ClientMeta) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::info!(conn_id = %meta.conn_id, remote = %meta.remote_addr, "client connected");
        })
    }

    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called for `create_application`.
    fn on_create_application(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called for `documents_complete`.
    fn on_documents_complete(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called for `get_status`.
    fn on_get_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called for `get_documents`.
    fn on_get_documents(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called for `upload_create` from the resumable transport.
    fn on_upload_create(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called for `upload_finished` from the resumable transport.
    fn on_upload_finished(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called for `upload_terminated` from the resumable transport.
    fn on_upload_terminated(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, 501, "not implemented");
        })
    }

    /// Called when the client disconnects (cleanup hook).
    fn on_client_disconnected(&self, meta: ClientMeta) -> HandlerFuture<'_> {
        let _ = meta;
        Box::pin(async {})
    }
}

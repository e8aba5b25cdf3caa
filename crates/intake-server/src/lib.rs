//! WebSocket server for the intake API.
//!
//! Accepts any number of client connections, parses the JSON envelope of
//! each text frame, and dispatches requests to a [`Handler`]. The framework
//! owns the connection lifecycle (read/write pumps, ping/pong, graceful
//! shutdown); [`IntakeHandler`] supplies the application API on top of
//! [`formupload_intake::Intake`].

mod connection;
mod handler;
mod intake_handler;
mod server;

pub use connection::{ClientConnection, ClientMeta, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use intake_handler::IntakeHandler;
pub use server::{IntakeServer, ServerConfig};

/// Send buffer capacity per connection. API traffic is request/response,
/// so a client never has many replies in flight.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the intake server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server already running")]
    AlreadyRunning,
}

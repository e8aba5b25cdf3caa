//! [`Handler`] implementation backed by the intake stores.

use std::sync::Arc;

use formupload_intake::{ApiError, Intake};
use formupload_protocol::MessageType;
use formupload_protocol::envelope::Message;
use formupload_protocol::messages::{
    CreateApplicationRequest, DocumentsCompleteRequest, DocumentsRequest, StatusRequest,
    UploadCreateRequest, UploadFinishedRequest, UploadTerminatedRequest,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// Serves the application API from a shared [`Intake`].
pub struct IntakeHandler {
    intake: Arc<Intake>,
}

impl IntakeHandler {
    pub fn new(intake: Arc<Intake>) -> Self {
        Self { intake }
    }

    pub fn intake(&self) -> &Arc<Intake> {
        &self.intake
    }
}

/// Parses the request payload, replying 400 when it is missing or malformed.
fn parse_request<T: DeserializeOwned>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.require_payload::<T>() {
        Ok(req) => Some(req),
        Err(e) => {
            tracing::warn!(id = %msg.id, msg_type = ?msg.msg_type, "bad request payload: {e}");
            let _ = sender.send_error(msg, 400, &format!("invalid payload: {e}"));
            None
        }
    }
}

/// Sends either the response payload or the error as a reply to `msg`.
fn respond<T: Serialize>(
    sender: &Sender,
    msg: &Message,
    msg_type: MessageType,
    result: Result<T, ApiError>,
) {
    match result {
        Ok(resp) => match msg.reply(msg_type, Some(&resp)) {
            Ok(reply) => {
                let _ = sender.send_msg(reply);
            }
            Err(e) => {
                tracing::error!(id = %msg.id, "failed to encode response: {e}");
                let _ = sender.send_error(msg, 500, "internal error");
            }
        },
        Err(e) => {
            if let ApiError::Internal(detail) = &e {
                tracing::error!(id = %msg.id, msg_type = ?msg.msg_type, "request failed: {detail}");
            }
            let _ = sender.send_error(msg, e.code(), &e.public_message());
        }
    }
}

impl Handler for IntakeHandler {
    fn on_create_application(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<CreateApplicationRequest>(&sender, &msg) else {
                return;
            };
            let result = self.intake.service().create_application(&req);
            respond(&sender, &msg, MessageType::ApplicationCreated, result);
        })
    }

    fn on_documents_complete(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<DocumentsCompleteRequest>(&sender, &msg) else {
                return;
            };
            let result = self.intake.service().documents_complete(&req).await;
            respond(&sender, &msg, MessageType::DocumentsCompleteResponse, result);
        })
    }

    fn on_get_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<StatusRequest>(&sender, &msg) else {
                return;
            };
            let result = self.intake.service().get_status(&req);
            respond(&sender, &msg, MessageType::StatusResponse, result);
        })
    }

    fn on_get_documents(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<DocumentsRequest>(&sender, &msg) else {
                return;
            };
            let result = self.intake.service().get_documents(&req);
            respond(&sender, &msg, MessageType::DocumentsResponse, result);
        })
    }

    fn on_upload_create(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<UploadCreateRequest>(&sender, &msg) else {
                return;
            };
            let result = self.intake.hooks().handle_create(&req).map_err(ApiError::from);
            respond(&sender, &msg, MessageType::UploadAccepted, result);
        })
    }

    fn on_upload_finished(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<UploadFinishedRequest>(&sender, &msg) else {
                return;
            };
            let result = self
                .intake
                .hooks()
                .handle_finished(&req)
                .await
                .map_err(ApiError::from);
            respond(&sender, &msg, MessageType::UploadRecorded, result);
        })
    }

    fn on_upload_terminated(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_request::<UploadTerminatedRequest>(&sender, &msg) else {
                return;
            };
            let result = self
                .intake
                .hooks()
                .handle_terminated(&req)
                .await
                .map_err(ApiError::from);
            respond(&sender, &msg, MessageType::UploadRemoved, result);
        })
    }
}

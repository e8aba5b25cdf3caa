//! Client side of the intake API.
//!
//! [`ApplicationApi`] abstracts the four application requests so the
//! submission flow can run against the WebSocket client ([`WsApiClient`])
//! or a test double. [`FormSubmission`] drives the batch-first flow: start
//! uploading under a provisional batch key, create the application, wait
//! for the uploads to settle, then report the outcome for reconciliation.

pub mod api;
pub mod error;
pub mod submission;
pub mod ws_client;

pub use api::{ApiFuture, ApplicationApi};
pub use error::ClientError;
pub use submission::{ApplicantForm, FormSubmission, SubmissionOutcome};
pub use ws_client::WsApiClient;

//! Application API seam.

use std::future::Future;
use std::pin::Pin;

use formupload_protocol::messages::{
    ApplicationCreatedResponse, CreateApplicationRequest, DocumentsCompleteRequest,
    DocumentsCompleteResponse, DocumentsRequest, DocumentsResponse, StatusRequest, StatusResponse,
};

use crate::error::ClientError;

/// A boxed future returned by [`ApplicationApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Abstract connection to the intake API.
///
/// Implemented by [`WsApiClient`](crate::WsApiClient); using a trait keeps
/// the submission flow testable with mocks.
pub trait ApplicationApi: Send + Sync {
    fn create_application<'a>(
        &'a self,
        req: &'a CreateApplicationRequest,
    ) -> ApiFuture<'a, ApplicationCreatedResponse>;

    fn documents_complete<'a>(
        &'a self,
        req: &'a DocumentsCompleteRequest,
    ) -> ApiFuture<'a, DocumentsCompleteResponse>;

    fn get_status<'a>(&'a self, req: &'a StatusRequest) -> ApiFuture<'a, StatusResponse>;

    fn get_documents<'a>(&'a self, req: &'a DocumentsRequest) -> ApiFuture<'a, DocumentsResponse>;
}

//! Server core for form uploads.
//!
//! Holds the single process-wide set of stores: the upload [`Registry`],
//! the [`ApplicationStore`], the [`Reconciler`] that binds batches to
//! applications, the transport event [`UploadHooks`], and the request
//! boundary [`IntakeService`]. Construct one [`Intake`] per process and
//! share it by reference.

pub mod applications;
pub mod error;
pub mod hooks;
pub mod reconcile;
pub mod registry;
pub mod service;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use applications::{ApplicationRecord, ApplicationStore, generate_application_id};
pub use error::{ApiError, HookError, ReconcileError, StoreError};
pub use hooks::{UploadHooks, parse_upload_metadata};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::Registry;
pub use service::IntakeService;

/// Default public transport endpoint advertised to clients.
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "http://localhost:8080/api/tus";

/// Default per-upload size limit (500 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 500 * 1024 * 1024;

/// Construction options for [`Intake`].
#[derive(Debug, Clone)]
pub struct IntakeOptions {
    pub buffer_path: PathBuf,
    pub upload_endpoint: String,
    pub max_upload_size: u64,
}

impl Default for IntakeOptions {
    fn default() -> Self {
        Self {
            buffer_path: formupload_file_ops::default_buffer_path(),
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.into(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

/// The owned store set.
pub struct Intake {
    buffer_path: PathBuf,
    registry: Arc<Registry>,
    applications: Arc<ApplicationStore>,
    hooks: UploadHooks,
    service: IntakeService,
}

impl Intake {
    /// Creates the stores and makes sure the buffer directory exists.
    pub fn new(options: IntakeOptions) -> Result<Self, formupload_file_ops::FileOpsError> {
        let buffer_path = formupload_file_ops::ensure_buffer_dir(&options.buffer_path)?;
        let registry = Arc::new(Registry::new());
        let applications = Arc::new(ApplicationStore::new(Arc::clone(&registry)));
        let reconciler = Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&applications),
            buffer_path.clone(),
        );
        let hooks = UploadHooks::new(
            Arc::clone(&registry),
            buffer_path.clone(),
            options.max_upload_size,
        );
        let service = IntakeService::new(
            Arc::clone(&registry),
            Arc::clone(&applications),
            reconciler,
            options.upload_endpoint,
        );
        tracing::info!(buffer = %buffer_path.display(), "intake stores ready");
        Ok(Self {
            buffer_path,
            registry,
            applications,
            hooks,
            service,
        })
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn applications(&self) -> &Arc<ApplicationStore> {
        &self.applications
    }

    pub fn hooks(&self) -> &UploadHooks {
        &self.hooks
    }

    pub fn service(&self) -> &IntakeService {
        &self.service
    }
}

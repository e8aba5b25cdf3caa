//! Wires the intake stores to the API server and runs until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use formupload_intake::{Intake, IntakeOptions};
use formupload_intake_server::{IntakeHandler, IntakeServer, ServerConfig};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let intake = Arc::new(Intake::new(IntakeOptions {
        buffer_path: PathBuf::from(&config.buffer_path),
        upload_endpoint: config.upload_endpoint.clone(),
        max_upload_size: config.max_upload_size,
    })?);

    let server = IntakeServer::new(
        ServerConfig {
            bind_address: config.bind_address,
            port: config.port,
        },
        IntakeHandler::new(Arc::clone(&intake)),
    );
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut server_task => {
            // The server only returns on its own when it failed to start.
            result??;
            return Ok(());
        }
    }

    server.shutdown();
    server_task.await??;
    Ok(())
}

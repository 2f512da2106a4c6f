mod config;
mod services;
mod telemetry;

use clap::Parser;
use config::GatewayConfig;
use joblib::storage::{ObjectStore, S3ObjectStore};
use joblib::{AdmissionGate, Orchestrator};
use services::jobservice::JobService;
use std::error;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    let config = GatewayConfig::parse();
    config.validate()?;
    telemetry::init_logging(&config.log_settings())?;

    let settings = Arc::new(config.pipeline_settings()?);
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&config.s3_settings()));
    let orchestrator = Orchestrator::new(AdmissionGate::new(), store, settings.clone());
    let app = JobService::new(Arc::new(orchestrator)).router();

    let listener = TcpListener::bind(config.addr).await?;
    info!(
        addr = %listener.local_addr()?,
        bucket = %settings.output_bucket,
        project_root = %settings.command.project_root.display(),
        workspace_root = %settings.workspace_root.display(),
        "gateway listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

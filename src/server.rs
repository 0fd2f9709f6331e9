use actix_web::{App, HttpServer, web};
use tracing::{info, warn};

use crate::api::{analysis::analysis_config, health::{health_config, HealthState}, validation};
use crate::app;
use crate::config::Config;
use crate::shutdown::ShutdownCoordinator;
use crate::worker;

/// Run the HTTP API and the worker pool until a shutdown signal arrives.
pub async fn serve(config: Config) -> std::io::Result<()> {
    info!("Starting stl-analysis service");
    info!("Configuration loaded successfully:");
    info!("  - Max payload size: {} bytes", config.max_payload_size);
    info!("  - Max upload size: {} bytes", config.max_upload_size);
    info!("  - Max concurrent jobs: {}", config.max_concurrent_jobs);
    info!("  - Number of workers: {}", config.num_workers);
    info!("  - Upload directory: {}", config.upload_dir.display());
    info!("  - Workspace root: {}", config.workspace_root.display());
    info!("  - Slicer timeout: {}s", config.slicer_timeout.as_secs());
    info!("  - Job lease: {}s", config.job_lease.as_secs());

    let runtime = app::build(&config).await.map_err(std::io::Error::other)?;

    match runtime.pipeline.sweep_workspaces().await {
        Ok(removed) => info!(removed, "Workspace sweep finished"),
        Err(e) => warn!(error = %e, "Workspace sweep failed, leftovers stay on disk"),
    }

    // watch channel allows multiple receivers to get the same value
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_handles = worker::spawn_workers(
        config.num_workers,
        config.max_concurrent_jobs,
        runtime.pipeline.clone(),
        runtime.collaborators.queue.clone(),
        shutdown_rx,
    );

    let service = web::Data::new(runtime.service.clone());
    let health = web::Data::new(HealthState {
        pool: runtime.pool.clone(),
    });
    let max_payload_size = config.max_payload_size;

    let server = HttpServer::new(move || {
        let payload_config = web::PayloadConfig::default().limit(max_payload_size);

        App::new()
            .app_data(service.clone())
            .app_data(health.clone())
            .app_data(payload_config)
            .app_data(validation::json_config(max_payload_size))
            .configure(health_config)
            .configure(analysis_config)
    });

    info!("Server starting on http://{}", config.bind_addr);
    let server = server.bind(config.bind_addr.as_str())?.run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(
        server_handle,
        server_task,
        worker_handles,
        shutdown_tx,
        runtime.pool,
    );
    coordinator.wait_for_shutdown().await
}

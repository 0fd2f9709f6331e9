use actix_web::dev::ServerHandle;
use sqlx::{Pool, Postgres};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type ServerTask = JoinHandle<std::io::Result<()>>;

/// What ended the serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Interrupt,
    Terminate,
    ServerExited,
}

/// Coordinates an orderly stop of the service
///
/// Order of operations:
/// 1. Stop the HTTP server so no new analyses are submitted
/// 2. Tell workers to stop dequeuing
/// 3. Wait for in-flight analyses; they still reach COMPLETED or FAILED
///    and release their workspaces
/// 4. Close the database pool, if one is open
pub struct ShutdownCoordinator {
    server_handle: ServerHandle,
    server_task: ServerTask,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    pool: Option<Pool<Postgres>>,
}

impl ShutdownCoordinator {
    pub fn new(
        server_handle: ServerHandle,
        server_task: ServerTask,
        worker_handles: Vec<JoinHandle<()>>,
        shutdown_tx: watch::Sender<bool>,
        pool: Option<Pool<Postgres>>,
    ) -> Self {
        Self {
            server_handle,
            server_task,
            worker_handles,
            shutdown_tx,
            pool,
        }
    }

    /// Serve until CTRL+C, SIGTERM or the server stopping by itself, then
    /// drain the workers.
    pub async fn wait_for_shutdown(mut self) -> std::io::Result<()> {
        let trigger = tokio::select! {
            trigger = signal() => trigger,
            joined = &mut self.server_task => {
                log_server_exit(joined);
                Trigger::ServerExited
            }
        };
        info!(?trigger, "Shutting down");

        if trigger != Trigger::ServerExited {
            info!("Stopping HTTP server, new submissions are refused");
            self.server_handle.stop(true).await;
        }

        self.drain_workers().await;

        if trigger != Trigger::ServerExited {
            log_server_exit((&mut self.server_task).await);
        }

        if let Some(pool) = &self.pool {
            info!("Closing database connection pool...");
            pool.close().await;
        }

        info!("Shutdown complete");
        Ok(())
    }

    async fn drain_workers(&mut self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("All workers already exited before the stop signal");
        }

        let total = self.worker_handles.len();
        info!(workers = total, "Waiting for in-flight analyses to finish");
        for (index, handle) in self.worker_handles.drain(..).enumerate() {
            match handle.await {
                Ok(()) => info!("Worker {} stopped ({}/{})", index + 1, index + 1, total),
                Err(e) => error!("Worker {} ended abnormally: {:?}", index + 1, e),
            }
        }
    }
}

fn log_server_exit(joined: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => info!("HTTP server stopped"),
        Ok(Err(e)) => error!("HTTP server failed: {:?}", e),
        Err(e) => error!("HTTP server task panicked: {:?}", e),
    }
}

async fn signal() -> Trigger {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => Trigger::Interrupt,
        _ = terminate => Trigger::Terminate,
    }
}

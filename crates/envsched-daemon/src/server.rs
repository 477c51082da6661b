//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::service::SchedulerService;
use axum::Router;
use envsched_connection::ConnectionSupervisor;
use envsched_lifecycle::EnvironmentController;
use envsched_runtime::RuntimeConnector;
use envsched_store::InMemoryEnvironmentStore;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// envsched daemon server
pub struct Server {
    config: DaemonConfig,
    supervisor: Arc<ConnectionSupervisor>,
    service: Arc<SchedulerService>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Connect to the configured runtime and wire up the service.
    ///
    /// Fails if the runtime cannot be reached.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let connector = envsched_runtime::connector_from_config(&config.runtime)?;
        Self::with_connector(config, connector).await
    }

    pub async fn with_connector(
        config: DaemonConfig,
        connector: Arc<dyn RuntimeConnector>,
    ) -> DaemonResult<Self> {
        let supervisor = ConnectionSupervisor::new(connector, config.supervisor.clone());
        supervisor.start().await?;
        info!(
            backend = %config.runtime.backend,
            namespace = %config.runtime.namespace,
            "Runtime connection established"
        );

        let store = Arc::new(InMemoryEnvironmentStore::new());
        let controller = Arc::new(EnvironmentController::new(
            Arc::clone(&supervisor),
            store,
            config.lifecycle.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = Arc::new(SchedulerService::new(
            controller,
            shutdown_rx,
            config.server.request_timeout(),
        ));

        Ok(Self {
            config,
            supervisor,
            service,
            shutdown_tx,
        })
    }

    pub fn service(&self) -> &Arc<SchedulerService> {
        &self.service
    }

    pub fn router(&self) -> Router {
        create_router(
            AppState::new(Arc::clone(&self.service)),
            self.config.server.enable_cors,
        )
    }

    /// Serve on the configured address until Ctrl-C or SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        let listener = TcpListener::bind(self.config.server.listen_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves.
    ///
    /// On shutdown in-flight lifecycle operations are cancelled, open
    /// requests are drained and the runtime connection is closed.
    pub async fn serve(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> DaemonResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "envsched daemon listening");

        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                signal.await;
                info!("Shutting down, cancelling in-flight operations");
                // No receivers left is fine
                let _ = shutdown_tx.send(true);
            })
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        self.supervisor.stop().await;
        info!("envsched daemon stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, initiating graceful shutdown"),
        _ = terminate => info!("Received terminate signal, initiating graceful shutdown"),
    }
}

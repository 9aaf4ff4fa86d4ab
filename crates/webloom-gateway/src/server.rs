use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use webloom_core::config::GatewayConfig;
use webloom_core::event::EventBus;
use webloom_core::traits::{TaskStore, WorkflowStore};
use webloom_engine::{ExecutionEngine, TaskScheduler};

use crate::forward;
use crate::handlers;
use crate::router::MessageRouter;
use crate::routes;
use crate::state::AppState;

/// WebSocket + HTTP gateway server built on axum.
pub struct GatewayServer {
    state: Arc<AppState>,
    event_bus: Arc<EventBus>,
}

impl GatewayServer {
    /// Build the gateway with the standard workflow handlers.
    pub fn new(
        config: GatewayConfig,
        engine: ExecutionEngine,
        event_bus: Arc<EventBus>,
        workflows: Arc<dyn WorkflowStore>,
        tasks: Arc<dyn TaskStore>,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        let router = Arc::new(handlers::workflow_router(engine.clone(), workflows.clone()));
        Self {
            state: Arc::new(AppState {
                config,
                router,
                engine,
                workflows,
                tasks,
                scheduler,
            }),
            event_bus,
        }
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.state.router
    }

    /// The HTTP application, without binding a socket.
    pub fn app(&self) -> Router {
        let config = &self.state.config;
        Router::new()
            .route(&config.ws_path, get(routes::ws_handler))
            .route("/api/health", get(routes::health))
            .route("/api/status", get(routes::status))
            .route(
                "/api/v1/workflows",
                get(routes::list_workflows).post(routes::create_workflow),
            )
            .route(
                "/api/v1/workflows/{id}",
                get(routes::get_workflow)
                    .put(routes::update_workflow)
                    .delete(routes::delete_workflow),
            )
            .route(
                "/api/v1/tasks",
                get(routes::list_tasks).post(routes::create_task),
            )
            .route(
                "/api/v1/tasks/{id}",
                get(routes::get_task)
                    .put(routes::update_task)
                    .delete(routes::delete_task),
            )
            .route("/api/v1/tasks/{id}/execute", post(routes::execute_task))
            .route("/api/v1/tasks/{id}/stop", post(routes::stop_task))
            .layer(cors_layer(&config.cors_origins))
            .with_state(self.state.clone())
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let forwarder = forward::spawn_event_forwarder(
            &self.event_bus,
            self.state.router.clone(),
            shutdown.clone(),
        );

        let listener = TcpListener::bind(&self.state.config.bind).await?;
        info!(
            bind = %self.state.config.bind,
            ws_path = %self.state.config.ws_path,
            "Gateway listening"
        );

        axum::serve(listener, self.app())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        let _ = forwarder.await;
        info!("Gateway shut down");
        Ok(())
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

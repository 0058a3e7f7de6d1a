use crate::{
    app::AppContext,
    config::Config,
    error::{PlangateError, Result},
    http::{ApiKeysModule, BillingModule, GenerationModule, RouteModule, UsageModule},
};
use axum::{Router, extract::DefaultBodyLimit};
use std::time::Duration;
use tokio::signal;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Assigns a UUID `x-request-id` to requests that arrive without one.
#[derive(Clone, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let request_id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(request_id))
    }
}

/// The HTTP application: route modules, middleware and shared context.
pub struct App {
    router: Router<AppContext>,
    config: Config,
    context: AppContext,
}

impl App {
    /// Creates an App around an already built context, with default configuration
    pub fn new(context: AppContext) -> Self {
        Self::with_config(Config::default(), context)
    }

    pub fn with_config(config: Config, context: AppContext) -> Self {
        Self {
            router: Router::new(),
            config,
            context,
        }
    }

    /// Builder pattern for constructing an App
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Register a route module with the application
    pub fn register_module<M: RouteModule>(mut self, module: M) -> Self {
        self.router = module.register(self.router);
        self
    }

    /// Register the API key, usage, billing and generation endpoints.
    pub fn with_default_routes(self) -> Self {
        self.register_module(ApiKeysModule)
            .register_module(UsageModule)
            .register_module(BillingModule)
            .register_module(GenerationModule)
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// The finished router with middleware and state applied.
    ///
    /// Used by `serve` and by tests through the `plangate::testing` helpers.
    pub fn into_router(self) -> Router {
        let max_body_size = self.config.server.max_body_size;

        self.router
            .layer(DefaultBodyLimit::max(max_body_size))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .with_state(self.context)
    }

    /// Start the application server
    pub async fn serve(self) -> Result<()> {
        let addr = self
            .config
            .server
            .addr()
            .map_err(|e| PlangateError::internal(format!("Invalid server address: {}", e)))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PlangateError::internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!("Server starting on http://{}", addr);

        axum::serve(listener, self.into_router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| PlangateError::internal(format!("Server error: {}", e)))
    }
}

/// Builder for App with fluent API
///
/// Without an explicit context, `build` assembles one from the config.
#[must_use = "builder does nothing until you call build()"]
pub struct AppBuilder {
    config: Config,
    context: Option<AppContext>,
    modules: Vec<Box<dyn FnOnce(Router<AppContext>) -> Router<AppContext> + Send>>,
    default_routes: bool,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            context: None,
            modules: Vec::new(),
            default_routes: true,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, context: AppContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Leave out the built-in endpoints.
    pub fn without_default_routes(mut self) -> Self {
        self.default_routes = false;
        self
    }

    pub fn register_module<M: RouteModule + Send + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(move |router| module.register(router)));
        self
    }

    pub fn build(self) -> Result<App> {
        let context = match self.context {
            Some(context) => context,
            None => AppContext::builder().with_config(self.config.clone()).build()?,
        };

        let mut app = App::with_config(self.config, context);
        if self.default_routes {
            app = app.with_default_routes();
        }
        for register in self.modules {
            app.router = register(app.router);
        }
        Ok(app)
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    tracing::info!("Shutdown complete");
}

use axum::Router;

use crate::app::AppContext;

/// A group of endpoints mounted on the application router.
///
/// Routers are returned without state; [`App`](crate::App) applies the
/// [`AppContext`] once every module is in place.
///
/// ```ignore
/// struct StatusModule;
///
/// impl RouteModule for StatusModule {
///     fn name(&self) -> &'static str {
///         "status"
///     }
///
///     fn routes(&self) -> Router<AppContext> {
///         Router::new().route("/status", get(status))
///     }
///
///     fn prefix(&self) -> Option<&str> {
///         Some("/api")
///     }
/// }
/// ```
pub trait RouteModule {
    /// Short name used in startup logs.
    fn name(&self) -> &'static str;

    fn routes(&self) -> Router<AppContext>
    where
        Self: Sized;

    /// Mount point for every route of the module. `None` merges at the root.
    fn prefix(&self) -> Option<&str> {
        None
    }

    fn register(self, router: Router<AppContext>) -> Router<AppContext>
    where
        Self: Sized,
    {
        let routes = self.routes();
        let mounted = match self.prefix() {
            Some(prefix) => router.nest(prefix, routes),
            None => router.merge(routes),
        };

        tracing::debug!(
            target: "plangate::http",
            module = self.name(),
            prefix = self.prefix().unwrap_or("/"),
            "Route module registered"
        );
        mounted
    }
}

pub mod auth;
pub mod experiments;
pub mod firewall;
pub mod projects;
pub mod providers;
pub mod state;

pub use state::AppState;

use axum::Router;

/// Mounts every resource router onto a single `Router<AppState>`
/// (the teacher's `proxy_router` nests one router per concern; here
/// each concern is its own module instead of a proxy target).
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(providers::router())
        .merge(projects::router())
        .merge(experiments::router())
        .merge(firewall::router())
}

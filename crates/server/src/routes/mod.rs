pub mod health;
pub mod projects;
pub mod sync;
pub mod webhooks;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(projects::router())
        .merge(sync::router())
        .merge(webhooks::router())
}

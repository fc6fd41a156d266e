use crate::state::AppState;
use axum::Router;

pub mod google;
pub mod handlers;

pub fn router() -> Router<AppState> {
    handlers::oauth_routes()
}

use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod reset;
pub mod session;
pub mod verification;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}

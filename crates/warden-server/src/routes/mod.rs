//! HTTP route handlers.

pub mod health;
pub mod session;

pub use health::{HealthResponse, health, health_routes};
pub use session::{
    LoginRequest, LoginResponse, SessionView, delete_data_handler, get_session_handler,
    login_handler, logout_handler, put_data_handler,
};

//! Server wiring for remote REPL sessions.
//!
//! Provides:
//! - `Config` - TOML configuration with environment overrides
//! - `build_app` - Router with the REPL WebSocket endpoint

pub mod config;

use std::sync::Arc;

use axum::Router;
use remote_repl_executor::{CommandBuilder, PythonInterpreterFactory};
use remote_repl_session::SessionManager;
use remote_repl_transport::create_ws_router;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::Config;

/// Build the session manager described by `config`.
#[must_use]
pub fn build_manager(config: &Config) -> SessionManager<PythonInterpreterFactory> {
    let command = CommandBuilder::new(config.interpreter.command.clone())
        .params(config.interpreter.args.iter().cloned());
    SessionManager::new(
        PythonInterpreterFactory::new(command),
        config.auth.password.clone(),
    )
}

/// Build the HTTP application.
#[must_use]
pub fn build_app(config: &Config, manager: Arc<SessionManager<PythonInterpreterFactory>>) -> Router {
    create_ws_router(manager, &config.server.path).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

use std::sync::Arc;

use chatgen::app::App;
use chatgen::inference::{InferenceEngine, LlamaLoader};
use chatgen::session::SessionController;
use chatgen::storage::settings::{load_settings, save_settings, MODEL_PATH_ENV};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatgen=info")),
        )
        .init();

    let mut settings = load_settings();
    let Some(model_path) = settings.resolve_model_path(std::env::args().nth(1)) else {
        eprintln!("usage: chatgen <MODEL_PATH>  (or set {MODEL_PATH_ENV})");
        std::process::exit(2);
    };

    if settings.remember_model_path(&model_path) {
        if let Err(e) = save_settings(&settings) {
            tracing::warn!("Failed to save settings: {}", e);
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let engine = Arc::new(InferenceEngine::new(
        LlamaLoader,
        settings.engine_config(model_path),
    ));

    // The session runs on our runtime; the window runs its own event loop
    let session = {
        let _guard = runtime.enter();
        SessionController::spawn(engine, settings.session_config())
    };

    tracing::info!("chatgen starting");
    dioxus::LaunchBuilder::desktop()
        .with_context(session)
        .launch(App);

    drop(runtime);
}

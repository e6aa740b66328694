use std::net::SocketAddr;
use std::sync::Arc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use scheduling_cell::{
    PatientDirectory, SchedulingFacade, SchedulingState, StaticPatientDirectory, SupabasePatientDirectory,
};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::clock::ClinicClock;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    let patients: Arc<dyn PatientDirectory> = if config.is_patient_registry_configured() {
        info!("Using hosted patient registry at {}", config.supabase_url);
        Arc::new(SupabasePatientDirectory::new(SupabaseClient::new(&config)))
    } else {
        warn!("Patient registry not configured; accepting any patient id");
        Arc::new(StaticPatientDirectory::permissive())
    };

    let clock = ClinicClock::system(config.scheduling.clinic_utc_offset_minutes);
    let facade = SchedulingFacade::in_memory(&config.scheduling, clock, patients);
    let state = Arc::new(SchedulingState::new(config.clone(), Arc::new(facade)));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

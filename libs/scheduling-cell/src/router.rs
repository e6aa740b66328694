use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put, patch},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::SchedulingFacade;

pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub facade: Arc<SchedulingFacade>,
}

impl SchedulingState {
    pub fn new(config: Arc<AppConfig>, facade: Arc<SchedulingFacade>) -> Self {
        Self { config, facade }
    }
}

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    // Every front-desk operation requires an authenticated staff member
    let protected_routes = Router::new()
        // Doctor calendar
        .route("/doctors/{doctor_id}/availability", get(handlers::get_doctor_availability))
        .route("/doctors/{doctor_id}/shift", put(handlers::set_doctor_shift))
        .route("/doctors/{doctor_id}/appointments", get(handlers::get_doctor_appointments))

        // Appointments
        .route("/appointments", post(handlers::book_appointment))
        .route("/appointments/search", get(handlers::search_appointments))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}", put(handlers::update_appointment))
        .route("/appointments/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/appointments/{appointment_id}/check-in", post(handlers::check_in_appointment))
        .route("/appointments/{appointment_id}/no-show", post(handlers::mark_appointment_no_show))

        // Live queue
        .route("/queue", get(handlers::list_queue))
        .route("/queue/events", get(handlers::queue_events))
        .route("/queue/walk-ins", post(handlers::register_walk_in))
        .route("/queue/{category}/call-next", post(handlers::call_next))
        .route("/queue/visits/{visit_id}", get(handlers::get_visit))
        .route("/queue/visits/{visit_id}/call", post(handlers::call_visit))
        .route("/queue/visits/{visit_id}/recall", post(handlers::recall_visit))
        .route("/queue/visits/{visit_id}/complete", post(handlers::complete_visit))
        .route("/queue/visits/{visit_id}/cancel", post(handlers::cancel_visit))
        .route("/queue/visits/{visit_id}/no-show", post(handlers::mark_visit_no_show))
        .route("/queue/visits/{visit_id}/triage", post(handlers::update_visit_triage))
        .route("/queue/visits/{visit_id}/advance", post(handlers::advance_visit))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

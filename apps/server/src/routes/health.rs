use actix_web::{HttpResponse, Responder, get, web};
use pingwatch_service::Orchestrator;
use serde_json::json;

macros_utils::routes! {
    route health_route,
    route status_route,
}

/// Liveness route
/// This route returns no content, the response status is enough.
#[get("/")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// Engine counters, unauthenticated
#[get("/status")]
pub async fn status_route(orchestrator: web::Data<Orchestrator>) -> impl Responder {
    let schedules = orchestrator.schedules();
    HttpResponse::Ok().json(json!({
        "endpoints": orchestrator.registry().len().await,
        "schedules": schedules.list().await.len(),
        "running_timers": schedules.active_count().await,
    }))
}

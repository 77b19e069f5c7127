use actix_web::{HttpResponse, delete, get, post, put, web};
use pingwatch_service::{NewSchedule, Orchestrator, ScheduleUpdate};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::owner::Owner;

macros_utils::routes! {
    route create_schedule,
    route list_schedules,
    route get_schedule,
    route update_schedule,
    route delete_schedule,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    /// Only the schedule for this interval
    pub interval: Option<u64>,
}

#[post("/api/schedules")]
pub async fn create_schedule(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    body: web::Json<NewSchedule>,
) -> Result<HttpResponse, ApiError> {
    let schedule = orchestrator.create_schedule(Some(owner.as_str()), body.into_inner()).await?;
    Ok(HttpResponse::Created().json(schedule))
}

#[get("/api/schedules")]
pub async fn list_schedules(
    orchestrator: web::Data<Orchestrator>,
    _owner: Owner,
    query: web::Query<ScheduleQuery>,
) -> Result<HttpResponse, ApiError> {
    let schedules: Vec<_> = match query.interval {
        Some(interval) => orchestrator.get_schedule_by_interval(interval).await.into_iter().collect(),
        None => orchestrator.list_schedules().await,
    };
    Ok(HttpResponse::Ok().json(schedules))
}

#[get("/api/schedules/{id}")]
pub async fn get_schedule(
    orchestrator: web::Data<Orchestrator>,
    _owner: Owner,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let schedule = orchestrator.get_schedule(id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(schedule))
}

#[put("/api/schedules/{id}")]
pub async fn update_schedule(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    id: web::Path<Uuid>,
    body: web::Json<ScheduleUpdate>,
) -> Result<HttpResponse, ApiError> {
    let schedule = orchestrator
        .update_schedule(Some(owner.as_str()), id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(schedule))
}

/// Deletes the caller's endpoints in the schedule
#[delete("/api/schedules/{id}")]
pub async fn delete_schedule(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    orchestrator.delete_schedule(Some(owner.as_str()), id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

use actix_web::{HttpResponse, delete, get, post, put, web};
use chrono::{DateTime, Utc};
use pingwatch_service::Orchestrator;
use pingwatch_service::database::models::{EndpointUpdate, NewEndpoint};
use serde::Deserialize;

use crate::error::ApiError;
use crate::owner::Owner;

const DEFAULT_CHECK_LIMIT: usize = 20;
const MAX_CHECK_LIMIT: usize = 500;

macros_utils::routes! {
    route create_endpoint,
    route list_endpoints,
    route get_endpoint,
    route update_endpoint,
    route delete_endpoint,
    route endpoint_checks,
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpoint {
    pub url: String,
    #[serde(alias = "interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    pub limit: Option<usize>,
}

#[post("/api/endpoints")]
pub async fn create_endpoint(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    body: web::Json<CreateEndpoint>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let mut request = NewEndpoint::new(body.url, body.interval_seconds).with_owner(owner.0);
    request.expires_at = body.expires_at;

    let endpoint = orchestrator.create_endpoint(request).await?;
    Ok(HttpResponse::Created().json(endpoint))
}

#[get("/api/endpoints")]
pub async fn list_endpoints(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
) -> Result<HttpResponse, ApiError> {
    let endpoints = orchestrator.list_endpoints(Some(owner.as_str())).await;
    Ok(HttpResponse::Ok().json(endpoints))
}

#[get("/api/endpoints/{id}")]
pub async fn get_endpoint(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    id: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let endpoint = orchestrator.get_endpoint(Some(owner.as_str()), id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(endpoint))
}

#[put("/api/endpoints/{id}")]
pub async fn update_endpoint(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    id: web::Path<i64>,
    body: web::Json<EndpointUpdate>,
) -> Result<HttpResponse, ApiError> {
    let endpoint = orchestrator
        .update_endpoint(Some(owner.as_str()), id.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(endpoint))
}

#[delete("/api/endpoints/{id}")]
pub async fn delete_endpoint(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    id: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    orchestrator.delete_endpoint(Some(owner.as_str()), id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Most recent health checks first
#[get("/api/endpoints/{id}/checks")]
pub async fn endpoint_checks(
    orchestrator: web::Data<Orchestrator>,
    owner: Owner,
    id: web::Path<i64>,
    query: web::Query<ChecksQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_CHECK_LIMIT).clamp(1, MAX_CHECK_LIMIT);
    let checks = orchestrator.recent_checks(Some(owner.as_str()), id.into_inner(), limit).await?;
    Ok(HttpResponse::Ok().json(checks))
}

use actix_web::web::ServiceConfig;

mod endpoints;
mod health;
mod schedules;

pub fn routes(cfg: &mut ServiceConfig) {
    health::routes(cfg);
    endpoints::routes(cfg);
    schedules::routes(cfg);
}

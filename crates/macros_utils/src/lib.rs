//! Small declarative helpers shared by the HTTP binaries.

/// Generate a `routes` function registering every listed actix handler.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     route list_things,
/// }
///
/// App::new().configure(routes);
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $handler:path),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::__actix_web::web::ServiceConfig) {
            $( cfg.service($handler); )*
        }
    };
}

#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web as __actix_web;

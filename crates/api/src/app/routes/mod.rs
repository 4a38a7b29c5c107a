use axum::Router;

pub mod assemblies;
pub mod catalog;
pub mod stock;
pub mod system;
pub mod transfers;

/// Router for all tenant-scoped endpoints. Each area registers absolute
/// paths; they are merged into one tree here.
pub fn router() -> Router {
    Router::new()
        .merge(catalog::router())
        .merge(stock::router())
        .merge(transfers::router())
        .merge(assemblies::router())
}

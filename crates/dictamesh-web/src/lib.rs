//! The DictaMesh server: wires the fabric, catalog, adapter runtime and
//! gateway together and exposes the catalog REST surface plus the
//! federated query endpoint over axum.

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

pub use app::{AppState, Mesh, build_mesh, router};
pub use config::Config;

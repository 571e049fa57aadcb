//! HTTP front end: `POST /predict` and `GET /predict/histories`.

pub mod response;
pub mod routes;
pub mod server;
pub mod upload;

pub use routes::handle;
pub use server::{serve, shutdown_signal};

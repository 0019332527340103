//! HTTP handlers. Storage concerns are delegated to the services.

pub mod artifact_handlers;
pub mod extract;
pub mod health_handlers;
pub mod upload_handlers;

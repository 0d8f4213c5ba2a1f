pub mod app;
pub mod config;
pub mod infrastructure;
pub mod k8s;

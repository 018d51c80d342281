pub mod config;
pub mod draft;
pub mod engine;
pub mod error;
pub mod forms;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod repository;
pub mod session;

pub mod config;
pub mod database;
pub mod errors;
pub mod executor;
pub mod models;
pub mod scheduler;
pub mod sources;
pub mod utils;
pub mod web;

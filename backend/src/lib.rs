pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod schema;
pub mod utils;
pub mod web;

pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod store;
pub mod utils;

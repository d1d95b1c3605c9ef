pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod profile;
pub mod prom_metrics;
pub mod quest;
pub mod score;
pub mod store;
pub mod ticket;

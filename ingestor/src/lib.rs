//! Telemetry engine for unattended meteor-observation stations.

pub mod celestial;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod rest;
pub mod series;
pub mod service;
pub mod status;
pub mod store;
pub mod validate;

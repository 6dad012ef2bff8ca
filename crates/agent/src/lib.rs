//! Podwatch agent: periodic sync of every configured scope plus the HTTP
//! surface for health, metrics and live streaming

pub mod api;
pub mod config;

// src/lib.rs - Anchor windlass controller
pub mod communication;
pub mod config;
pub mod hardware;
pub mod scheduler;
pub mod telemetry;
pub mod web;
pub mod windlass;

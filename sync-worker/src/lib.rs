#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

pub mod config;
pub mod consumer;
pub mod health;
pub mod setup;
pub mod types;

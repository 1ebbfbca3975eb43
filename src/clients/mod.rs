// src/clients/mod.rs

//! Clients for the collaborator services (auth, stats).

pub mod auth;
pub mod outbox;
pub mod stats;

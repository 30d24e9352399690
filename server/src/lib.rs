//! Consultation messaging server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod chat;
pub mod config;
pub mod db;
pub mod notify;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;

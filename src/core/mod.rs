//! Shared primitives: error taxonomy, configuration, storage, the broker, the
//! transaction session, and the entity base every subsystem builds on.

pub mod broker;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod schemas;
pub mod session;
pub mod time;

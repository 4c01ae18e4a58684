//! A filtering D-Bus proxy: mediates a confined client's bus connection through an
//! allow-list of pattern rules, so the client sees only the names, interfaces and
//! members an operator has explicitly permitted.

pub mod config;
pub mod eavesdrop;
pub mod error;
pub mod listener;
pub mod rules;
pub mod session;
pub mod tracing_subscriber;

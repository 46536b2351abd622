//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of a backend connection.
//!
//! # Tasks
//! - TTL Monitor: Removes documents whose TTL index has expired them

mod ttl_monitor;

pub use ttl_monitor::spawn_ttl_monitor;

//! sitewatch - website availability and TLS certificate monitor.
//!
//! Probes a set of URLs every minute, tracks outages in SQLite, sends
//! debounced alerts to a Telegram chat and checks certificate expiry daily.

pub mod certs;
pub mod config;
pub mod db;
pub mod events;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod tls;

#[cfg(test)]
mod testing;

pub mod auth;
pub mod clock;
pub mod config;
pub mod registration;
pub mod report;
pub mod schedule;
pub mod transport;

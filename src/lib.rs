//! Live polls: concurrent vote/like counters with ordered fan-out to
//! connected clients.

pub mod config;
pub mod counter;
pub mod db;
pub mod error;
pub mod live;
pub mod polls;
pub mod service;
pub mod startup;

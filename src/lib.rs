//! Attendance classification and reporting for squadron training cycles

pub mod classify;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod history;
pub mod membership;
pub mod metrics;
pub mod models;
pub mod report;
pub mod roster;
pub mod store;

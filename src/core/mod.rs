pub mod billing;
pub mod config;
pub mod evergreen;
pub mod formatter;
pub mod models;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod store;

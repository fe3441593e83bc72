pub mod config;
pub mod egnn;
pub mod encoding;
pub mod model;
pub mod schedule;

//! Value objects published by the core services

pub mod analysis;
pub mod dataset;
pub mod installation;

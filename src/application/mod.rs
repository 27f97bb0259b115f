pub mod aggregation;
pub mod bootstrap;
pub mod commands;
pub mod session;

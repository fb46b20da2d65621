pub mod commands;
pub mod liveness;

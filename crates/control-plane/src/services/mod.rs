//! Domain layer. HTTP handlers convert wire payloads into the request
//! structs here; everything below speaks records and `ApiResult`.

pub mod agent;
pub mod commands;
pub mod instances;
pub mod nodes;
pub mod tokens;

use sqlx::SqlitePool;

pub mod bundles;
pub mod commands;
pub mod migrations;
pub mod nodes;
pub mod services;
pub mod tokens;

pub type Db = SqlitePool;

pub use bundles::BundleRecord;
pub use commands::{CommandRecord, NewCommand};
pub use migrations::{MigrationLabel, MigrationRunOutcome, MigrationSnapshot};
pub use nodes::{AgentContact, NewNode, NodeFilter, NodeRecord, NodeUpdate};
pub use services::{NewService, ServiceRecord, ServiceRuntimeUpdate, ServiceUpdate};
pub use tokens::{AgentTokenRecord, NewAgentToken};

pub use crate::http::ApiDoc;
pub use crate::http::build_metrics_router;
pub use crate::http::build_router;
pub use crate::tasks::commands::{command_sweep_loop, run_command_sweep, CommandSweepReport};
pub use crate::tasks::liveness::{liveness_loop, run_liveness_sweep, LivenessReport};

mod maintenance;
mod restore;
mod run;
mod schedule;
mod status;

pub use maintenance::handle_maintenance_command;
pub use restore::handle_restore_command;
pub use run::{run_job, run_jobs};
pub use schedule::run_schedule;
pub use status::{run_log, run_status};

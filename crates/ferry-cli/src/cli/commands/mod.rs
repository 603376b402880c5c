//! CLI command handlers.

mod run;
mod status;
mod submit;

pub use run::{run_daemon, transitions};
pub use status::{format_row, run_status};
pub use submit::{describe_reply, submit};

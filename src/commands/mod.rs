//! CLI command implementations

mod device;
mod flash;
mod list;
mod program;

pub use device::{run_echo, run_reboot, run_test};
pub use flash::{run_clear_flash, run_program_from_flash, run_query_flash};
pub use list::list_devices;
pub use program::run_program;

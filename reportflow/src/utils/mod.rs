//! Small helpers shared by the stages, the scheduler and the CLI.

pub mod tabular;
pub mod timestamps;

pub use tabular::{header_of, placeholder_row, to_csv};
pub use timestamps::{log_file_name, next_daily, run_stamp};

// Child process management
pub mod output;
pub mod supervisor;

pub use output::{apply_line, parse_progress, LineSplitter};
pub use supervisor::{
    spawn_supervised, OutputLines, ProcessHandle, ProcessState, StopOutcome, DEFAULT_STOP_GRACE,
};

// Durable file helpers
pub mod json_ops;

pub use json_ops::{append_json_line, read_json_lines, write_json_lines};

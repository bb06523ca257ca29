pub mod paths;
pub mod ring_buffer;
pub mod time;

pub use paths::*;
pub use ring_buffer::RingBuffer;
pub use time::now_secs;

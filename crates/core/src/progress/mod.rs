//! Progress normalization: raw backend output in, one structured model out.

mod parser;
mod speed;

pub use parser::{ProgressParser, ProgressUpdate};
pub use speed::SpeedTracker;

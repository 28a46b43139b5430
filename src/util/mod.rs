//! Small parsing helpers shared by the CLI and the polling driver.

mod duration;

pub use duration::{parse_duration, DurationError};

//! Processes: a tile function between configured inputs and one output.
//!
//! A [`Process`] is opened from a YAML process file ([`ProcessConfig`]) in a
//! [`RunMode`]. The batch scheduler and the tile server both go through
//! [`Process::get_raw_output`], which reads or computes output per mode.

pub mod config;
pub mod error;
pub mod function;
pub mod mode;
pub mod process;

pub use config::{InputSpec, ProcessConfig, ZoomRange};
pub use error::{ProcessError, Result};
pub use function::{OpenedInput, TileContext, TileFunction};
pub use mode::RunMode;
pub use process::{Process, ProcessInput};

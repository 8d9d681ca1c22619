//! The control tasks run by the board modules.
//!
//! Each task owns its timers and configuration and touches the outside world
//! only through [`crate::scheduler::Context`].

pub mod brake;
pub mod fuel;
pub mod input;
pub mod keypad;
pub mod lights;
pub mod power;
pub mod scanner;
pub mod starter;
pub mod status;

pub use brake::{BrakeConfig, BrakeLights, BrakeMode};
pub use fuel::{FuelConfig, FuelLevel};
pub use input::{InputConfig, InputSampler};
pub use keypad::{KeypadConfig, KeypadToggles};
pub use lights::{LightMirror, LightReporter, MirrorConfig, ReporterConfig};
pub use power::{PowerConfig, PowerSequencer, PowerState};
pub use scanner::{Scanner, ScannerConfig};
pub use starter::{Starter, StarterConfig};
pub use status::{StatusConfig, StatusReporter};

#![no_std]

// Application logic for the PDM board family.
//
// Everything here is portable across the MCU firmware and host tooling: the
// firmware supplies real pins and a CAN peripheral behind the `hal` traits,
// the emulator and the tests supply `sim::SimIo`.

pub mod board;
pub mod can;
pub mod hal;
pub mod isotp;
pub mod scheduler;
pub mod sim;
pub mod state;
pub mod tasks;
pub mod telemetry;
pub mod timer;

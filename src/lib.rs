// Copyright 2026 Cornell University
// released under MIT License

pub mod bridge;
pub mod command;
pub mod config;
pub mod device;
mod driver;
pub mod errors;
mod monitor;
pub mod scoreboard;
pub mod signal;
pub mod sim;
pub mod stimulus;
pub mod testbench;
mod ticker;

pub use driver::{next_action, DriverAction, DriverState};
pub use monitor::RisingEdge;

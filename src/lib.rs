//! # HydroPulse Library
//!
//! Poll hydraulic sensor channels over a Modbus RTU serial link.
//!
//! This library provides the acquisition core of HydroPulse: a registry of
//! calibrated channels, a poll loop with retry-then-skip semantics, a rolling
//! 5-minute window for live display, an unbounded session log, and exporters
//! that write both to spreadsheet-friendly files.

pub mod acquisition;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod export;
pub mod serial;

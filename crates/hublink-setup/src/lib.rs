//! # hublink-setup
//!
//! Command-line front-end that pairs the hub with a Bluetooth LE controller.
//!
//! - [`cli`] - Argument parsing
//! - [`app`] - Command execution on top of `hublink-core`
//! - [`logging`] - Development and production log output

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod app;
pub mod cli;
pub mod logging;

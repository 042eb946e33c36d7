//! Fetch the latest Samsung firmware for an attached device and unpack its
//! `param.bin` assets.
//!
//! See [`pipeline`] for the order of things.

pub mod acquire;
pub mod adb;
pub mod config;
pub mod error;
pub mod extract;
pub mod identity;
pub mod metadata;
pub mod pipeline;
pub mod process;
pub mod utils;

pub use error::{Error, Result};

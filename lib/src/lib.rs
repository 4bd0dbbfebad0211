/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the vliwsched library.

// Make the analysis module public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod analysis;
#[cfg(not(feature = "fuzzing"))]
mod analysis;

mod alignment;
mod bundle;
mod data_structures;
mod dependence;
mod emit;
mod format;
mod format_selector;
mod hazard;
mod interblock;
mod interface;
mod machine_scheduler;
mod region_scheduler;
mod scoreboard;

pub use crate::interface::*;

//! Target knowledge for the Blend65 middle-end.
//!
//! Describes the machines the compiler can emit for (the C64 is the only
//! fully implemented one), validates `@zp`/`@map` placements against the
//! target's reserved ranges, and annotates IL with zero-page priorities,
//! register preferences, and cycle estimates.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod arith;
mod config;
mod cycles;
mod hints;
mod zp;

pub use arith::{checked_range_end, ranges_overlap};
pub use config::{
    Architecture, GraphicsChip, MemoryRegion, SoundChip, TargetConfig, TargetError, ZeroPageMap,
    ZeroPageRange,
};
pub use cycles::{estimate_cycles, mode_penalty, CycleCost};
pub use hints::{HintAnalyzer, ZpCandidate};
pub use zp::validate_placements;

//! Code-segment validation.
//!
//! The validator proves four properties of a code segment in a single forward
//! pass plus one target-checking sweep: no instruction crosses a bundle
//! boundary, only whitelisted instruction classes appear (gated by the target
//! CPU's features), register-indirect control transfers are immediately
//! preceded by their address mask, and the reserved base register is never
//! written. Direct-branch targets are collected during the pass and checked
//! against the recorded instruction boundaries at the end.
//!
//! Three entry points: [`Validator::validate_segment`] (strict),
//! [`Validator::validate_segment_stubout`] (overwrite policy violations with
//! HLT fill), and [`Validator::validate_segment_pair`] (layout-preserving
//! replacement for live patching).

mod boundary;
mod cpu;
mod replacement;
mod report;
mod segment;

pub use boundary::BoundaryMap;
pub use cpu::CpuFeatures;
pub use report::{ValidationReport, Violation, ViolationRecord};
pub use segment::{Validator, DEFAULT_ERROR_LIMIT, HALT_BYTE};

//! Validation outcome reporting.

use strum::{Display, EnumIter};

/// The rule an instruction violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum Violation {
    /// An instruction crosses a bundle boundary.
    BundleStraddle,
    /// The opcode class is never permitted in sandboxed code.
    IllegalOpcode,
    /// A register-indirect jump or call without its masking guard.
    UnguardedIndirectTransfer,
    /// An instruction writes the reserved sandbox base register.
    BaseRegisterClobbered,
    /// The instruction class requires a CPU feature the target lacks.
    UnsupportedCpuFeature,
    /// A direct branch lands on a byte that is not an instruction boundary.
    BadJumpTarget,
    /// The bytes do not decode; never recoverable by stubbing.
    DecodeFailure,
    /// Replacement code drifted from the original instruction layout.
    ReplacementMisaligned,
}

impl Violation {
    /// Whether stub-out mode may overwrite the offending instruction.
    ///
    /// Decode failures have no trustworthy length and layout drift has no
    /// single offending instruction, so neither can be stubbed.
    #[must_use]
    pub fn stubbable(&self) -> bool {
        !matches!(self, Violation::DecodeFailure | Violation::ReplacementMisaligned)
    }
}

/// One recorded rule violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    /// Virtual address of the offending instruction (or intended target).
    pub vaddr: u64,
    /// Which rule was broken.
    pub kind: Violation,
    /// Human-readable detail.
    pub message: String,
}

/// The outcome of validating a code segment.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    recorded: Vec<ViolationRecord>,
    suppressed: usize,
    limit: usize,
}

impl ValidationReport {
    pub(crate) fn new(limit: usize) -> Self {
        ValidationReport {
            recorded: Vec::new(),
            suppressed: 0,
            limit,
        }
    }

    pub(crate) fn record(&mut self, vaddr: u64, kind: Violation, message: String) {
        if self.recorded.len() < self.limit {
            log::debug!("validation: {kind} at {vaddr:#x}: {message}");
            self.recorded.push(ViolationRecord {
                vaddr,
                kind,
                message,
            });
        } else {
            self.suppressed += 1;
        }
    }

    /// True when the segment passed with no violations at all.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.recorded.is_empty() && self.suppressed == 0
    }

    /// The recorded violations, in discovery order, capped at the report limit.
    #[must_use]
    pub fn violations(&self) -> &[ViolationRecord] {
        &self.recorded
    }

    /// Number of violations discovered past the report cap.
    #[must_use]
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// Total violation count, including suppressed records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.recorded.len() + self.suppressed
    }

    /// Whether any recorded violation is of the given kind.
    #[must_use]
    pub fn has(&self, kind: Violation) -> bool {
        self.recorded.iter().any(|r| r.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn report_caps_and_counts() {
        let mut report = ValidationReport::new(2);
        assert!(report.ok());

        for i in 0..5 {
            report.record(i, Violation::IllegalOpcode, String::from("x"));
        }
        assert!(!report.ok());
        assert_eq!(report.violations().len(), 2);
        assert_eq!(report.suppressed(), 3);
        assert_eq!(report.total(), 5);
        assert!(report.has(Violation::IllegalOpcode));
        assert!(!report.has(Violation::BundleStraddle));
    }

    #[test]
    fn only_decode_and_layout_failures_resist_stubbing() {
        for kind in Violation::iter() {
            let expect = !matches!(
                kind,
                Violation::DecodeFailure | Violation::ReplacementMisaligned
            );
            assert_eq!(kind.stubbable(), expect, "{kind}");
        }
    }
}

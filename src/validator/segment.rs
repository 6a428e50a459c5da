//! Single-segment validation: the forward decode pass, the rule checks, and
//! the post-pass jump-target verification.

use crate::decoder::{decode, DecodedInstruction, Gpr, InstClass};

use super::boundary::BoundaryMap;
use super::cpu::CpuFeatures;
use super::report::{ValidationReport, Violation};

/// The byte every stubbed or padded code location is filled with (HLT).
pub const HALT_BYTE: u8 = 0xF4;

/// Default cap on recorded violations per report.
pub const DEFAULT_ERROR_LIMIT: usize = 100;

/// Segment validator, parameterized by bundle size.
///
/// A validator is cheap to construct and stateless across calls; one instance
/// can serve any number of segments concurrently.
#[derive(Debug, Clone)]
pub struct Validator {
    bundle_size: usize,
    error_limit: usize,
}

/// One rule violation found by the internal pass, with the extent needed for
/// stub-out.
pub(super) struct Finding {
    pub offset: usize,
    pub len: u8,
    pub kind: Violation,
    pub message: String,
}

impl Validator {
    /// Creates a validator for the given bundle size (16 or 32 bytes).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for any other bundle size.
    pub fn new(bundle_size: usize) -> crate::Result<Validator> {
        if bundle_size != 16 && bundle_size != 32 {
            return Err(malformed_error!("unsupported bundle size {}", bundle_size));
        }
        Ok(Validator {
            bundle_size,
            error_limit: DEFAULT_ERROR_LIMIT,
        })
    }

    /// Replaces the violation-report cap (default [`DEFAULT_ERROR_LIMIT`]).
    #[must_use]
    pub fn with_error_limit(mut self, limit: usize) -> Validator {
        self.error_limit = limit;
        self
    }

    /// The configured bundle size in bytes.
    #[must_use]
    pub fn bundle_size(&self) -> usize {
        self.bundle_size
    }

    pub(super) fn error_limit(&self) -> usize {
        self.error_limit
    }

    /// The immediate a masking AND must carry for this bundle size.
    #[must_use]
    pub fn mask_immediate(&self) -> i64 {
        -(self.bundle_size as i64)
    }

    /// Validates a code segment in strict mode.
    ///
    /// `vbase` is the virtual address of the first byte and must be
    /// bundle-aligned. Every violation is recorded (up to the report cap);
    /// the segment is acceptable only when [`ValidationReport::ok`] holds.
    pub fn validate_segment(&self, code: &[u8], vbase: u64, cpu: CpuFeatures) -> ValidationReport {
        debug_assert_eq!(vbase % self.bundle_size as u64, 0);
        let mut report = ValidationReport::new(self.error_limit);
        for f in self.pass(code, cpu) {
            report.record(vbase + f.offset as u64, f.kind, f.message);
        }
        report
    }

    /// Validates in stub-out mode: policy violations with a known instruction
    /// length are overwritten in place with HLT fill, and the pass repeats
    /// until the segment is clean or a fatal (non-stubbable) violation
    /// remains. Decode failures are always fatal.
    pub fn validate_segment_stubout(
        &self,
        code: &mut [u8],
        vbase: u64,
        cpu: CpuFeatures,
    ) -> ValidationReport {
        debug_assert_eq!(vbase % self.bundle_size as u64, 0);
        let mut report = ValidationReport::new(self.error_limit);
        loop {
            let findings = self.pass(code, cpu);
            if findings.is_empty() {
                return report;
            }
            let mut stubbed = 0usize;
            for f in &findings {
                if f.kind.stubbable() && f.len > 0 {
                    let end = f.offset + f.len as usize;
                    code[f.offset..end].fill(HALT_BYTE);
                    stubbed += 1;
                    log::debug!(
                        "stubbed {} bytes at {:#x} ({})",
                        f.len,
                        vbase + f.offset as u64,
                        f.kind
                    );
                } else {
                    report.record(vbase + f.offset as u64, f.kind, f.message.clone());
                }
            }
            if stubbed == 0 || !report.ok() {
                return report;
            }
        }
    }

    /// The forward pass: decode, record boundaries, apply per-instruction
    /// rules, then verify every direct-branch target against the boundary map.
    pub(super) fn pass(&self, code: &[u8], cpu: CpuFeatures) -> Vec<Finding> {
        let bundle = self.bundle_size;
        let effective = halt_trim(code, bundle);
        let code = &code[..effective];

        let mut findings = Vec::new();
        let mut boundaries = BoundaryMap::new(effective);
        let mut jumps: Vec<(usize, u8, i64)> = Vec::new();
        let mut prev: Option<DecodedInstruction> = None;

        let mut offset = 0usize;
        while offset < effective {
            let inst = match decode(code, offset) {
                Ok(inst) => inst,
                Err(err) => {
                    findings.push(Finding {
                        offset,
                        len: 0,
                        kind: Violation::DecodeFailure,
                        message: err.to_string(),
                    });
                    // Resynchronize at the next bundle boundary; everything up
                    // to it is unreachable anyway once validation fails.
                    offset = (offset / bundle + 1) * bundle;
                    prev = None;
                    continue;
                }
            };

            if inst.fill_len > 0 {
                // The final instruction ran off the end of the segment.
                findings.push(Finding {
                    offset,
                    len: 0,
                    kind: Violation::DecodeFailure,
                    message: String::from("instruction overruns the segment end"),
                });
                break;
            }

            boundaries.set(offset, true);
            self.check_instruction(&inst, cpu, &mut findings);

            if let Some(target) = inst.branch_target() {
                jumps.push((offset, inst.length, target));
            }

            if inst.class.is_indirect_transfer() {
                match self.check_guard(&inst, prev.as_ref()) {
                    Ok(()) => {
                        // Mask and transfer form one pseudo-instruction: its
                        // start (the mask) is a legal branch target, the
                        // transfer itself is not.
                        boundaries.set(inst.offset, false);
                    }
                    Err(message) => findings.push(Finding {
                        offset,
                        len: inst.length,
                        kind: Violation::UnguardedIndirectTransfer,
                        message,
                    }),
                }
            }

            offset = inst.end();
            prev = Some(inst);
        }

        for (off, len, target) in jumps {
            let ok = if target >= 0 && (target as usize) < effective {
                boundaries.get(target as usize)
            } else {
                // Outside the segment (trampolines, the halt sled): the target
                // must sit on a bundle boundary.
                target.rem_euclid(bundle as i64) == 0
            };
            if !ok {
                findings.push(Finding {
                    offset: off,
                    len,
                    kind: Violation::BadJumpTarget,
                    message: format!("branch to non-boundary offset {target:#x}"),
                });
            }
        }

        findings.sort_by_key(|f| f.offset);
        findings
    }

    fn check_instruction(
        &self,
        inst: &DecodedInstruction,
        cpu: CpuFeatures,
        findings: &mut Vec<Finding>,
    ) {
        let bundle = self.bundle_size;
        if inst.offset / bundle != (inst.end() - 1) / bundle {
            findings.push(Finding {
                offset: inst.offset,
                len: inst.length,
                kind: Violation::BundleStraddle,
                message: format!("{}-byte instruction crosses a bundle boundary", inst.length),
            });
        }

        if inst.class.is_forbidden() {
            findings.push(Finding {
                offset: inst.offset,
                len: inst.length,
                kind: Violation::IllegalOpcode,
                message: format!("{} instruction is not permitted", inst.class),
            });
        } else if !cpu.allows(inst.class) {
            findings.push(Finding {
                offset: inst.offset,
                len: inst.length,
                kind: Violation::UnsupportedCpuFeature,
                message: format!("{} requires a missing CPU feature", inst.class),
            });
        } else if uses_lock_improperly(inst) {
            findings.push(Finding {
                offset: inst.offset,
                len: inst.length,
                kind: Violation::IllegalOpcode,
                message: String::from("lock prefix on a non-lockable form"),
            });
        }

        for gpr in inst.written_gprs().into_iter().flatten() {
            if gpr == Gpr::R15 {
                findings.push(Finding {
                    offset: inst.offset,
                    len: inst.length,
                    kind: Violation::BaseRegisterClobbered,
                    message: String::from("instruction writes the reserved base register"),
                });
            }
        }
    }

    /// Verifies the mask guard for an indirect transfer; a diagnostic names
    /// the failure.
    fn check_guard(
        &self,
        inst: &DecodedInstruction,
        prev: Option<&DecodedInstruction>,
    ) -> Result<(), String> {
        let target = inst
            .indirect_target_gpr()
            .ok_or_else(|| String::from("indirect transfer through memory"))?;
        let mask = prev.ok_or_else(|| String::from("no instruction precedes the transfer"))?;
        if mask.end() != inst.offset {
            return Err(String::from("mask does not immediately precede the transfer"));
        }
        if mask.offset / self.bundle_size != inst.offset / self.bundle_size {
            return Err(String::from("mask and transfer are in different bundles"));
        }
        if !is_mask_instruction(mask, target, self.mask_immediate()) {
            return Err(format!(
                "transfer through r{} lacks its masking AND",
                target.0
            ));
        }
        Ok(())
    }
}

/// True when `inst` is the canonical 32-bit `AND r, imm8` mask of `target`
/// with the expected immediate.
fn is_mask_instruction(inst: &DecodedInstruction, target: Gpr, imm: i64) -> bool {
    use crate::decoder::PrefixFlags;

    inst.opcode_len == 1
        && inst.opcode == 0x83
        && inst.modrm_mod() == Some(3)
        && inst.modrm_reg() == Some(4)
        && inst.rm_gpr() == Some(target)
        && inst.imm_value == imm
        // The mask must be the 32-bit form: it relies on the implicit
        // zero-extension of the upper half.
        && !inst
            .prefixes
            .intersects(PrefixFlags::DATA16 | PrefixFlags::REX_W | PrefixFlags::LOCK)
}

fn uses_lock_improperly(inst: &DecodedInstruction) -> bool {
    use crate::decoder::PrefixFlags;

    if !inst.prefixes.contains(PrefixFlags::LOCK) {
        return false;
    }
    let lockable = matches!(
        inst.class,
        InstClass::BaselineLock | InstClass::Cx8 | InstClass::Cx16
    );
    // LOCK is only defined with a memory destination.
    !(lockable && inst.modrm_mod().is_some_and(|m| m != 3))
}

/// Trims a trailing halt run down to the last bundle boundary, so a large
/// halt sled appended after the code does not dominate validation time.
fn halt_trim(code: &[u8], bundle: usize) -> usize {
    let mut end = code.len();
    while end > 0 && code[end - 1] == HALT_BYTE {
        end -= 1;
    }
    (end.div_ceil(bundle) * bundle).min(code.len())
}

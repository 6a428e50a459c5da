//! Replacement validation for live code patching.
//!
//! A patch may change immediates and displacements but never instruction
//! layout: the old and new segments are decoded in lockstep and every
//! instruction pair must agree on start offset and length, with byte
//! differences confined to the immediate and displacement fields. The new
//! segment must additionally pass full single-segment validation.

use crate::decoder::decode;

use super::cpu::CpuFeatures;
use super::report::{ValidationReport, Violation};
use super::segment::Validator;

impl Validator {
    /// Validates `new` as an in-place replacement for `old` at `vbase`.
    ///
    /// Both slices cover the same virtual range. The report is `ok` only when
    /// the instruction layout is unchanged, differing bytes fall inside
    /// immediate/displacement fields, and `new` independently validates.
    pub fn validate_segment_pair(
        &self,
        old: &[u8],
        new: &[u8],
        vbase: u64,
        cpu: CpuFeatures,
    ) -> ValidationReport {
        let mut report = ValidationReport::new(self.error_limit());

        if old.len() != new.len() {
            report.record(
                vbase,
                Violation::ReplacementMisaligned,
                format!(
                    "replacement length {} differs from original {}",
                    new.len(),
                    old.len()
                ),
            );
            return report;
        }

        let bundle = self.bundle_size();
        let mut offset = 0usize;
        while offset < new.len() {
            let (old_inst, new_inst) = match (decode(old, offset), decode(new, offset)) {
                (Ok(o), Ok(n)) => (o, n),
                (o, n) => {
                    let err = o.err().or(n.err());
                    report.record(
                        vbase + offset as u64,
                        Violation::DecodeFailure,
                        err.map_or_else(String::new, |e| e.to_string()),
                    );
                    offset = (offset / bundle + 1) * bundle;
                    continue;
                }
            };

            if old_inst.length != new_inst.length {
                report.record(
                    vbase + offset as u64,
                    Violation::ReplacementMisaligned,
                    format!(
                        "instruction length changed from {} to {}",
                        old_inst.length, new_inst.length
                    ),
                );
                offset = (offset / bundle + 1) * bundle;
                continue;
            }

            let len = new_inst.length as usize;
            for i in 0..len {
                if old[offset + i] == new[offset + i] {
                    continue;
                }
                let in_disp = new_inst.disp_len > 0
                    && i >= new_inst.disp_offset as usize
                    && i < new_inst.disp_offset as usize + new_inst.disp_len as usize;
                let in_imm = new_inst.imm_len > 0
                    && i >= new_inst.imm_offset as usize
                    && i < new_inst.imm_offset as usize + new_inst.imm_len as usize;
                if !in_disp && !in_imm {
                    report.record(
                        vbase + (offset + i) as u64,
                        Violation::ReplacementMisaligned,
                        String::from("byte outside immediate/displacement fields changed"),
                    );
                    break;
                }
            }

            offset += len;
        }

        // Layout agreement alone is not acceptance: the new bytes must also
        // pass every single-segment rule.
        for f in self.pass(new, cpu) {
            report.record(vbase + f.offset as u64, f.kind, f.message);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: usize = 32;

    fn validator() -> Validator {
        Validator::new(BUNDLE).unwrap()
    }

    fn bundled(parts: &[&[u8]]) -> Vec<u8> {
        let mut code: Vec<u8> = parts.concat();
        while code.len() % BUNDLE != 0 {
            code.push(0x90);
        }
        code
    }

    #[test]
    fn immediate_change_is_accepted() {
        let old = bundled(&[&[0xB8, 0x01, 0x00, 0x00, 0x00]]); // mov eax, 1
        let new = bundled(&[&[0xB8, 0x2A, 0x00, 0x00, 0x00]]); // mov eax, 42
        let report = validator().validate_segment_pair(&old, &new, 0, CpuFeatures::baseline());
        assert!(report.ok(), "{:?}", report.violations());
    }

    #[test]
    fn displacement_change_is_accepted() {
        let old = bundled(&[&[0x8B, 0x43, 0x08]]); // mov eax, [rbx+8]
        let new = bundled(&[&[0x8B, 0x43, 0x10]]); // mov eax, [rbx+16]
        let report = validator().validate_segment_pair(&old, &new, 0, CpuFeatures::baseline());
        assert!(report.ok(), "{:?}", report.violations());
    }

    #[test]
    fn opcode_change_is_rejected() {
        let old = bundled(&[&[0x83, 0xC0, 0x01]]); // add eax, 1
        let new = bundled(&[&[0x83, 0xE8, 0x01]]); // sub eax, 1 (modrm reg differs)
        let report = validator().validate_segment_pair(&old, &new, 0, CpuFeatures::baseline());
        assert!(report.has(Violation::ReplacementMisaligned));
    }

    #[test]
    fn length_drift_is_rejected() {
        let old = bundled(&[&[0xB8, 0x01, 0x00, 0x00, 0x00, 0x90]]); // mov eax,1 ; nop
        let new = bundled(&[&[0x90, 0xB8, 0x01, 0x00, 0x00, 0x00]]); // nop ; mov eax,1
        let report = validator().validate_segment_pair(&old, &new, 0, CpuFeatures::baseline());
        assert!(report.has(Violation::ReplacementMisaligned));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let old = bundled(&[&[0x90]]);
        let new = vec![0x90; 2 * BUNDLE];
        let report = validator().validate_segment_pair(&old, &new, 0, CpuFeatures::baseline());
        assert!(report.has(Violation::ReplacementMisaligned));
    }

    #[test]
    fn replacement_must_still_validate() {
        // Same layout, but the new immediate redirects a branch into the
        // middle of the following instruction.
        let old = bundled(&[&[0xEB, 0x03, 0x83, 0xC0, 0x01, 0x90]]); // jmp over the add
        let new = bundled(&[&[0xEB, 0x04, 0x83, 0xC0, 0x01, 0x90]]); // jmp into its tail
        let report = validator().validate_segment_pair(&old, &new, 0, CpuFeatures::baseline());
        assert!(report.has(Violation::BadJumpTarget));
    }

    #[test]
    fn identical_segments_pass() {
        let code = bundled(&[&[0x55, 0x48, 0x89, 0xE5, 0x5D]]);
        let report = validator().validate_segment_pair(&code, &code, 0, CpuFeatures::baseline());
        assert!(report.ok(), "{:?}", report.violations());
    }
}

//! CPU feature gating for validated code.

use crate::decoder::InstClass;
use bitflags::bitflags;

bitflags! {
    /// Instruction-set extensions the target processor supports.
    ///
    /// Validation rejects any instruction whose class requires a feature not in
    /// this set, so validated code can never raise #UD on the machine it was
    /// validated for. [`CpuFeatures::all`] is the cross-validation superset:
    /// accept anything the decoder understands regardless of the local CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFeatures: u32 {
        /// x87 floating point.
        const X87 = 1 << 0;
        /// MMX.
        const MMX = 1 << 1;
        /// SSE.
        const SSE = 1 << 2;
        /// SSE2, including the fence instructions.
        const SSE2 = 1 << 3;
        /// SSE3.
        const SSE3 = 1 << 4;
        /// SSSE3.
        const SSSE3 = 1 << 5;
        /// SSE4.1.
        const SSE41 = 1 << 6;
        /// SSE4.2.
        const SSE42 = 1 << 7;
        /// CMOVcc.
        const CMOV = 1 << 8;
        /// POPCNT.
        const POPCNT = 1 << 9;
        /// LZCNT/TZCNT.
        const LZCNT = 1 << 10;
        /// MOVBE.
        const MOVBE = 1 << 11;
        /// CMPXCHG8B.
        const CX8 = 1 << 12;
        /// CMPXCHG16B.
        const CX16 = 1 << 13;
        /// RDTSC.
        const TSC = 1 << 14;
        /// 3DNow!.
        const THREE_D_NOW = 1 << 15;
    }
}

impl CpuFeatures {
    /// A plausible baseline for early x86-64 hardware, useful in tests.
    #[must_use]
    pub fn baseline() -> CpuFeatures {
        CpuFeatures::X87
            | CpuFeatures::MMX
            | CpuFeatures::SSE
            | CpuFeatures::SSE2
            | CpuFeatures::CMOV
            | CpuFeatures::CX8
            | CpuFeatures::TSC
    }

    /// The feature an instruction class requires, if any.
    ///
    /// Classes with no entry are either always acceptable or rejected outright
    /// before feature gating applies.
    #[must_use]
    pub fn required_for(class: InstClass) -> Option<CpuFeatures> {
        match class {
            InstClass::X87 => Some(CpuFeatures::X87),
            InstClass::Mmx => Some(CpuFeatures::MMX),
            InstClass::Sse => Some(CpuFeatures::SSE),
            InstClass::Sse2 | InstClass::SseFence => Some(CpuFeatures::SSE2),
            InstClass::Sse3 => Some(CpuFeatures::SSE3),
            InstClass::Ssse3 => Some(CpuFeatures::SSSE3),
            InstClass::Sse41 => Some(CpuFeatures::SSE41),
            InstClass::Sse42 => Some(CpuFeatures::SSE42),
            InstClass::Cmov => Some(CpuFeatures::CMOV),
            InstClass::Popcnt => Some(CpuFeatures::POPCNT),
            InstClass::Lzcnt => Some(CpuFeatures::LZCNT),
            InstClass::Movbe => Some(CpuFeatures::MOVBE),
            InstClass::Cx8 => Some(CpuFeatures::CX8),
            InstClass::Cx16 => Some(CpuFeatures::CX16),
            InstClass::Rdtsc => Some(CpuFeatures::TSC),
            InstClass::ThreeDNow => Some(CpuFeatures::THREE_D_NOW),
            InstClass::MmxSse2 => Some(CpuFeatures::MMX | CpuFeatures::SSE2),
            _ => None,
        }
    }

    /// Whether this feature set permits the given class.
    #[must_use]
    pub fn allows(&self, class: InstClass) -> bool {
        match CpuFeatures::required_for(class) {
            Some(required) => self.contains(required),
            None => true,
        }
    }
}

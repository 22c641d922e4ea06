// SPDX-License-Identifier: GPL-2.0

//! Inclusion gating
//!
//! Decides, per map or program entry, whether the running environment is
//! inside the entry's loader version window, kernel version window, and
//! platform allowances. A gated-out entry is skipped, never failed.

use std::fmt;

use crate::env::{Arch, BuildFlavor, EnvSnapshot};
use crate::metadata::{IgnoreFlags, MapDef, ProgDef};

/// The gating inputs shared by map and program definitions.
#[derive(Debug, Clone, Copy)]
pub struct GateKeys {
    /// Inclusive loader version floor.
    pub bpfloader_min_ver: u32,
    /// Exclusive loader version ceiling.
    pub bpfloader_max_ver: u32,
    /// Inclusive kernel version floor.
    pub min_kver: u32,
    /// Exclusive kernel version ceiling.
    pub max_kver: u32,
    /// Platform exclusion bits.
    pub ignore_on: IgnoreFlags,
}

impl From<&MapDef> for GateKeys {
    fn from(md: &MapDef) -> Self {
        Self {
            bpfloader_min_ver: md.bpfloader_min_ver,
            bpfloader_max_ver: md.bpfloader_max_ver,
            min_kver: md.min_kver,
            max_kver: md.max_kver,
            ignore_on: md.ignore_on,
        }
    }
}

impl From<&ProgDef> for GateKeys {
    fn from(pd: &ProgDef) -> Self {
        Self {
            bpfloader_min_ver: pd.bpfloader_min_ver,
            bpfloader_max_ver: pd.bpfloader_max_ver,
            min_kver: pd.min_kver,
            max_kver: pd.max_kver,
            ignore_on: pd.ignore_on,
        }
    }
}

/// Why an entry was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The running loader version is below the entry's floor.
    LoaderTooOld {
        /// The entry's inclusive floor.
        required: u32,
    },
    /// The running loader version is at or above the entry's ceiling.
    LoaderTooNew {
        /// The entry's exclusive ceiling.
        limit: u32,
    },
    /// The running kernel is below the entry's floor.
    KernelTooOld {
        /// The entry's inclusive floor.
        required: u32,
    },
    /// The running kernel is at or above the entry's ceiling.
    KernelTooNew {
        /// The entry's exclusive ceiling.
        limit: u32,
    },
    /// The entry is ignored on the active build flavor.
    BuildFlavor(BuildFlavor),
    /// The entry is ignored on the active CPU platform.
    Platform(&'static str),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LoaderTooOld { required } => {
                write!(f, "requires bpfloader min ver 0x{required:05x}")
            }
            SkipReason::LoaderTooNew { limit } => {
                write!(f, "requires bpfloader max ver 0x{limit:05x}")
            }
            SkipReason::KernelTooOld { required } => {
                write!(f, "requires kernel version >= 0x{required:x}")
            }
            SkipReason::KernelTooNew { limit } => {
                write!(f, "requires kernel version < 0x{limit:x}")
            }
            SkipReason::BuildFlavor(flavor) => {
                write!(f, "is ignored on {} builds", flavor.as_str())
            }
            SkipReason::Platform(arch) => write!(f, "is ignored on {arch}"),
        }
    }
}

/// Evaluate the gate. `None` means the entry is included.
pub fn evaluate(env: &EnvSnapshot, keys: &GateKeys) -> Option<SkipReason> {
    if env.loader_version < keys.bpfloader_min_ver {
        return Some(SkipReason::LoaderTooOld {
            required: keys.bpfloader_min_ver,
        });
    }
    if env.loader_version >= keys.bpfloader_max_ver {
        return Some(SkipReason::LoaderTooNew {
            limit: keys.bpfloader_max_ver,
        });
    }
    if env.kernel_version < keys.min_kver {
        return Some(SkipReason::KernelTooOld {
            required: keys.min_kver,
        });
    }
    if env.kernel_version >= keys.max_kver {
        return Some(SkipReason::KernelTooNew {
            limit: keys.max_kver,
        });
    }

    let flavor_bit = match env.build_flavor {
        BuildFlavor::Eng => IgnoreFlags::ENG,
        BuildFlavor::User => IgnoreFlags::USER,
        BuildFlavor::Userdebug => IgnoreFlags::USERDEBUG,
        BuildFlavor::Unknown => IgnoreFlags::empty(),
    };
    if !flavor_bit.is_empty() && keys.ignore_on.contains(flavor_bit) {
        return Some(SkipReason::BuildFlavor(env.build_flavor));
    }

    let platform_bit = match (env.arch, env.is_kernel_64bit) {
        (Arch::Arm, false) => IgnoreFlags::ARM32,
        (Arch::Arm, true) => IgnoreFlags::AARCH64,
        (Arch::X86, false) => IgnoreFlags::X86_32,
        (Arch::X86, true) => IgnoreFlags::X86_64,
        (Arch::RiscV, _) => IgnoreFlags::RISCV64,
        (Arch::Other, _) => IgnoreFlags::empty(),
    };
    if !platform_bit.is_empty() && keys.ignore_on.contains(platform_bit) {
        return Some(SkipReason::Platform(env.describe_arch()));
    }

    None
}

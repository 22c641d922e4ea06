// SPDX-License-Identifier: GPL-2.0

//! Runtime environment probe
//!
//! Collects everything about the running system that gating decisions
//! depend on into a single immutable [`EnvSnapshot`]: kernel version,
//! architecture, kernel/userspace bitness, build flavor, platform API
//! level, and the derived loader version. The snapshot is produced once
//! at startup and never changes for the lifetime of the run.
//!
//! All raw inputs arrive through the [`SystemProbe`] trait so tests can
//! fabricate arbitrary environments without touching the OS.

use log::warn;

// ============================================================================
// Constants
// ============================================================================

/// Version of the first mainline loader. Every later capability bumps this
/// by one, so a running loader always reports at least this version.
pub const LOADER_BASE_VERSION: u32 = 42;

/// Platform API level of the T release.
pub const API_LEVEL_T: u32 = 33;
/// Platform API level of the U release.
pub const API_LEVEL_U: u32 = 34;
/// Platform API level of the V release.
pub const API_LEVEL_V: u32 = 35;

/// Pack a kernel version triple into the 24-bit form used everywhere in
/// map and program definitions: `(major << 16) | (minor << 8) | sub`.
///
/// The sublevel saturates at 255 so large stable-series sublevels cannot
/// bleed into the minor field.
pub const fn kver(major: u32, minor: u32, sub: u32) -> u32 {
    (major << 16) | (minor << 8) | if sub > 255 { 255 } else { sub }
}

// ============================================================================
// Architecture / Build Flavor
// ============================================================================

/// CPU architecture families the loader distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 32- or 64-bit ARM
    Arm,
    /// 32- or 64-bit x86
    X86,
    /// 64-bit RISC-V
    RiscV,
    /// Anything else
    Other,
}

impl Arch {
    /// Classify a `uname` machine string.
    pub fn from_machine(machine: &str) -> Self {
        if machine.starts_with("aarch64") || machine.starts_with("arm") {
            Arch::Arm
        } else if machine.starts_with("x86") || machine.starts_with("i686") {
            Arch::X86
        } else if machine.starts_with("riscv64") {
            Arch::RiscV
        } else {
            Arch::Other
        }
    }
}

/// Build flavor of the running image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFlavor {
    /// Engineering build
    Eng,
    /// Production build
    User,
    /// Debuggable production build
    Userdebug,
    /// Could not be determined
    Unknown,
}

impl BuildFlavor {
    /// Parse the build-type property value.
    pub fn from_property(value: &str) -> Self {
        match value {
            "eng" => BuildFlavor::Eng,
            "user" => BuildFlavor::User,
            "userdebug" => BuildFlavor::Userdebug,
            _ => BuildFlavor::Unknown,
        }
    }

    /// Property string for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildFlavor::Eng => "eng",
            BuildFlavor::User => "user",
            BuildFlavor::Userdebug => "userdebug",
            BuildFlavor::Unknown => "unknown",
        }
    }
}

// ============================================================================
// System Probe
// ============================================================================

/// Source of the raw environment inputs.
///
/// The loader core never reads properties or calls `uname` directly; it
/// goes through this trait. [`OsProbe`] is the production implementation.
pub trait SystemProbe {
    /// Kernel release string, e.g. `"5.15.110-android13"`.
    fn kernel_release(&self) -> String;
    /// Machine string, e.g. `"aarch64"`.
    fn machine(&self) -> String;
    /// Raw build-type property value.
    fn build_type(&self) -> String;
    /// Shipped platform API level.
    fn device_api_level(&self) -> u32;
    /// Whether the platform reports a pre-release codename.
    fn has_unreleased_codename(&self) -> bool;
    /// Effective uid of this process.
    fn uid(&self) -> u32;
    /// System page size in bytes.
    fn page_size(&self) -> u32;
}

/// Production probe backed by `uname(2)`, `getuid(2)`, `sysconf(3)` and
/// the system property store.
#[derive(Debug, Default)]
pub struct OsProbe;

impl SystemProbe for OsProbe {
    fn kernel_release(&self) -> String {
        crate::sys::uname_release()
    }

    fn machine(&self) -> String {
        crate::sys::uname_machine()
    }

    fn build_type(&self) -> String {
        crate::sys::property_get("ro.build.type", "unknown")
    }

    fn device_api_level(&self) -> u32 {
        crate::sys::property_get("ro.build.version.sdk", "0")
            .parse()
            .unwrap_or(0)
    }

    fn has_unreleased_codename(&self) -> bool {
        // Released devices report the literal codename REL; default to REL
        // so a failed read never claims pre-release status.
        crate::sys::property_get("ro.build.version.codename", "REL") != "REL"
    }

    fn uid(&self) -> u32 {
        crate::sys::current_uid()
    }

    fn page_size(&self) -> u32 {
        crate::sys::page_size()
    }
}

// ============================================================================
// Environment Snapshot
// ============================================================================

/// Immutable description of the running environment.
#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    /// Packed 24-bit kernel version, 0 if the release string was unparsable.
    pub kernel_version: u32,
    /// Whether the kernel is 64-bit.
    pub is_kernel_64bit: bool,
    /// Whether this process runs with 32-bit pointers.
    pub is_userspace_32bit: bool,
    /// CPU architecture family.
    pub arch: Arch,
    /// Build flavor of the image.
    pub build_flavor: BuildFlavor,
    /// Effective platform API level (bumped by one on pre-release builds).
    pub effective_api_level: u32,
    /// Whether the loader runs as root.
    pub running_as_root: bool,
    /// Derived loader version, always at least [`LOADER_BASE_VERSION`].
    pub loader_version: u32,
    /// System page size in bytes.
    pub page_size: u32,
}

impl EnvSnapshot {
    /// Probe the environment once.
    pub fn probe(probe: &dyn SystemProbe) -> Self {
        let release = probe.kernel_release();
        let kernel_version = parse_kernel_release(&release);
        if kernel_version == 0 {
            warn!("unparsable kernel release '{release}'");
        }

        let machine = probe.machine();
        let arch = Arch::from_machine(&machine);
        let is_userspace_32bit = cfg!(target_pointer_width = "32");
        // A 64-bit process implies a 64-bit kernel; a 32-bit process may
        // still sit on top of a 64-bit kernel, which the machine string
        // reveals.
        let is_kernel_64bit = !is_userspace_32bit || machine.contains("64");

        let running_as_root = probe.uid() == 0;
        let unreleased = probe.has_unreleased_codename();
        let effective_api_level = probe.device_api_level() + u32::from(unreleased);

        let mut loader_version = LOADER_BASE_VERSION;
        if effective_api_level >= API_LEVEL_T {
            loader_version += 1;
        }
        if effective_api_level >= API_LEVEL_U {
            loader_version += 1;
        }
        if running_as_root {
            loader_version += 1;
        }
        if effective_api_level >= API_LEVEL_V {
            loader_version += 1;
        }

        EnvSnapshot {
            kernel_version,
            is_kernel_64bit,
            is_userspace_32bit,
            arch,
            build_flavor: BuildFlavor::from_property(&probe.build_type()),
            effective_api_level,
            running_as_root,
            loader_version,
            page_size: probe.page_size(),
        }
    }

    /// Whether the kernel is at least `major.minor.sub`.
    pub fn is_at_least_kernel_version(&self, major: u32, minor: u32, sub: u32) -> bool {
        self.kernel_version >= kver(major, minor, sub)
    }

    /// Short architecture description used in skip logs, combining family
    /// and kernel bitness.
    pub fn describe_arch(&self) -> &'static str {
        match (self.arch, self.is_kernel_64bit) {
            (Arch::Arm, false) => "arm32",
            (Arch::Arm, true) => "arm64",
            (Arch::X86, false) => "x86_32",
            (Arch::X86, true) => "x86_64",
            (Arch::RiscV, _) => "riscv64",
            (Arch::Other, _) => "unknown",
        }
    }
}

/// Parse a kernel release string into the packed 24-bit version.
///
/// Accepts `major.minor.sub` with arbitrary trailing text; returns 0 when
/// fewer than three numeric components are present.
fn parse_kernel_release(release: &str) -> u32 {
    let mut parts = [0u32; 3];
    let mut idx = 0;
    let mut cur: Option<u32> = None;
    for ch in release.chars() {
        if let Some(d) = ch.to_digit(10) {
            cur = Some(cur.unwrap_or(0).saturating_mul(10).saturating_add(d));
        } else {
            match cur.take() {
                Some(v) => {
                    parts[idx] = v;
                    idx += 1;
                    if idx == 3 {
                        return kver(parts[0], parts[1], parts[2]);
                    }
                    if ch != '.' {
                        break;
                    }
                }
                None => break,
            }
        }
    }
    if let Some(v) = cur {
        parts[idx] = v;
        idx += 1;
    }
    if idx == 3 {
        kver(parts[0], parts[1], parts[2])
    } else {
        0
    }
}

//! Boot-time loader binary.
//!
//! Probes the environment, enforces the platform preconditions, writes
//! the bpf sysctl knobs, creates the pin directories, and runs the
//! loader over every search location. Exit codes: 0 on success, 1 when
//! an environment or configuration precondition fails, 2 when a
//! critical object fails to load.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::{error, info, Level, LevelFilter, Metadata, Record};

use bpf_loader::core::types::BpfMapType;
use bpf_loader::env::{Arch, BuildFlavor, EnvSnapshot, OsProbe, API_LEVEL_U, API_LEVEL_V};
use bpf_loader::{orchestrator, sys};

const LOG_TAG: &str = "bpfloader";

// ============================================================================
// Kernel Logger
// ============================================================================

/// Logger writing `<level>`-prefixed lines to `/dev/kmsg` so loader
/// output lands in the kernel ring buffer alongside the boot messages,
/// with stderr as the fallback.
struct KernelLogger {
    sink: Mutex<Option<File>>,
}

static LOGGER: KernelLogger = KernelLogger {
    sink: Mutex::new(None),
};

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let prio = match record.level() {
            Level::Error => 3,
            Level::Warn => 4,
            Level::Info => 6,
            Level::Debug | Level::Trace => 7,
        };
        let line = format!("<{prio}>{LOG_TAG}: {}\n", record.args());

        let mut sink = self.sink.lock().unwrap();
        if sink.is_none() {
            *sink = OpenOptions::new().write(true).open("/dev/kmsg").ok();
        }
        let wrote = match sink.as_mut() {
            Some(f) => f.write_all(line.as_bytes()).is_ok(),
            None => false,
        };
        if !wrote {
            eprint!("{line}");
        }
    }

    fn flush(&self) {}
}

// ============================================================================
// Preconditions and Load
// ============================================================================

fn check_preconditions(env: &EnvSnapshot) -> bool {
    // The first mainline release already required eBPF on 4.9, and each
    // later release ratchets the floor up.
    if !env.is_at_least_kernel_version(4, 9, 0) {
        error!("kernel 4.9 is required.");
        return false;
    }
    if env.effective_api_level >= API_LEVEL_U && !env.is_at_least_kernel_version(4, 14, 0) {
        error!("api level {} requires kernel 4.14.", env.effective_api_level);
        return false;
    }
    if env.effective_api_level >= API_LEVEL_V && !env.is_at_least_kernel_version(4, 19, 0) {
        error!("api level {} requires kernel 4.19.", env.effective_api_level);
        return false;
    }

    // Known ABI layout issues with bpf on 32-bit x86 kernels.
    if env.effective_api_level >= API_LEVEL_V && env.arch == Arch::X86 && !env.is_kernel_64bit {
        error!("x86 kernel must be 64-bit.");
        return false;
    }

    // 32-bit userspace talking bpf to modern 64-bit kernels has broken
    // ringbuffer compatibility and poor jit support.
    if env.is_userspace_32bit && env.is_at_least_kernel_version(6, 2, 0) {
        error!("64-bit userspace required on 6.2+ kernels.");
        return false;
    }

    if env.build_flavor == BuildFlavor::Unknown {
        error!("failed to determine the build type: want 'eng', 'user', or 'userdebug'");
        return false;
    }

    true
}

fn write_sysctls(env: &EnvSnapshot) -> bool {
    if env.running_as_root {
        // 5.16 changed the default to disabled-but-changeable; we need
        // it enabled. The write is known to fail on some older kernels
        // where the default is already 0.
        if sys::write_proc_sys_file("/proc/sys/kernel/unprivileged_bpf_disabled", "0\n").is_err()
            && env.is_at_least_kernel_version(5, 13, 0)
        {
            return false;
        }
    }

    if env.effective_api_level >= API_LEVEL_U {
        // Both fail with ENOENT on kernels built without BPF_JIT /
        // HAVE_EBPF_JIT, which the platform requires anyway.
        if sys::write_proc_sys_file("/proc/sys/net/core/bpf_jit_enable", "1\n").is_err() {
            return false;
        }
        if sys::write_proc_sys_file("/proc/sys/net/core/bpf_jit_kallsyms", "1\n").is_err() {
            return false;
        }
    }

    true
}

/// Prove the kernel can actually service map writes before declaring
/// success; a failure here has always meant a broken kernel.
fn kernel_self_test() -> bool {
    let key: u32 = 1;
    let value: u32 = 123;
    let fd = match sys::bpf_create_map(
        BpfMapType::Array as u32,
        std::mem::size_of::<u32>() as u32,
        std::mem::size_of::<u32>() as u32,
        2,
        0,
        "",
        false,
    ) {
        Ok(fd) => fd,
        Err(e) => {
            error!("self-test map creation failed: {e}");
            return false;
        }
    };
    if let Err(e) = sys::bpf_map_update(&fd, &key.to_ne_bytes(), &value.to_ne_bytes(), sys::BPF_ANY)
    {
        error!("critical kernel bug - failure to write into index 1 of 2 element bpf map array: {e}");
        return false;
    }
    true
}

fn do_load(env: &EnvSnapshot) -> u8 {
    if !check_preconditions(env) {
        return 1;
    }
    if !write_sysctls(env) {
        return 1;
    }
    if orchestrator::create_pin_dirs().is_err() {
        return 1;
    }

    if orchestrator::load_all(env).is_err() {
        // Give the log a chance to be read before init reacts.
        thread::sleep(Duration::from_secs(20));
        return 2;
    }

    if !kernel_self_test() {
        return 1;
    }

    // Leave a flag that loading finished, visible to anything gating on
    // bpf availability.
    if sys::create_bpf_subdir("netd_shared/mainline_done").is_err() {
        return 1;
    }

    info!("done.");
    0
}

fn main() -> ExitCode {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Debug);

    let env = EnvSnapshot::probe(&OsProbe);
    info!(
        "bpfloader v0.{} api:{} kver:{:07x} ({}) {}{}",
        env.loader_version,
        env.effective_api_level,
        env.kernel_version,
        env.describe_arch(),
        env.build_flavor.as_str(),
        if env.running_as_root { " (root)" } else { "" },
    );

    ExitCode::from(do_load(&env))
}

use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonically increasing counter for generating unique resource names.
static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Linux limit for interface and namespace names used by `ip`.
pub const MAX_NAME_LEN: usize = 15;

/// Check whether we have sufficient privileges (root/sudo) and tools (`ip`)
/// available to create network namespaces. Returns `false` if the
/// environment cannot support namespace-backed suites.
pub fn check_privileges() -> bool {
    match Command::new("sudo").args(["-n", "ip", "netns"]).output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    }
}

/// Generates a unique namespace or device name with the given prefix.
///
/// Combines the prefix, process ID, and an atomic counter so that suites
/// running in parallel (in this process or another) never pick the same
/// name. The pid takes a fixed six hex digits (enough for Linux's largest
/// `pid_max`) and a `_` separates the counter. The prefix is shortened
/// first so both survive the 15 character limit.
pub fn unique_name(prefix: &str) -> String {
    let seq = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format_unique_name(prefix, std::process::id(), seq)
}

fn format_unique_name(prefix: &str, pid: u32, seq: u32) -> String {
    let suffix = format!("{:06x}_{:x}", pid & 0xFF_FFFF, seq);
    let room = MAX_NAME_LEN.saturating_sub(suffix.len());
    let prefix: String = prefix.chars().take(room.min(4)).collect();
    format!("{prefix}{suffix}")
}

//! Process metadata helpers for `uptime` and `status`.

use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Formats a duration in seconds to a human-readable string.
///
/// Returns "Xd Yh Zm" from one day up, "Xh Ym" from one hour up and "Xm"
/// otherwise.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// How long process `pid` has been running, read through sysinfo.
///
/// Returns `None` if the process cannot be found.
pub fn process_uptime(pid: u32) -> Option<Duration> {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|process| Duration::from_secs(process.run_time()))
}

/// True once `pid` is gone or only a zombie waiting for its parent.
///
/// A detached daemon's parent is whatever adopted it, which may reap late.
pub fn process_exited(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map_or(true, |process| {
        matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    })
}

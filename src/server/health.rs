//! Deep health checks — diagnostics, `/health`, `/health/ready`.
//!
//! Provides system-level diagnostics (disk, memory, file descriptors) and
//! readiness checks for container orchestrators.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// System-level diagnostics gathered on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemDiagnostics {
    /// Whether the temp storage directory is writable.
    pub storage_writable: bool,
    /// Free bytes on the filesystem containing the storage directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_free_bytes: Option<u64>,
    /// Resident set size of this process, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_rss_bytes: Option<u64>,
    /// Number of open file descriptors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_fds: Option<u64>,
}

/// Gathers system diagnostics on demand.
pub struct HealthChecker {
    storage_dir: PathBuf,
}

impl HealthChecker {
    /// Create a new health checker probing the given storage directory.
    pub fn new(storage_dir: PathBuf) -> Self {
        Self { storage_dir }
    }

    /// Gather all diagnostics. Cheap — no network calls involved.
    pub fn gather_diagnostics(&self) -> SystemDiagnostics {
        SystemDiagnostics {
            storage_writable: check_storage_writable(&self.storage_dir),
            disk_free_bytes: disk_free_bytes(&self.storage_dir),
            memory_rss_bytes: memory_rss_bytes(),
            open_fds: open_fd_count(),
        }
    }

    /// Check if the system is ready (for readiness probes).
    ///
    /// Ready means temp storage is writable; the gateway cannot serve
    /// file-producing functions without it.
    pub fn is_ready(&self) -> bool {
        check_storage_writable(&self.storage_dir)
    }
}

/// Touch + remove a temp file to verify the storage directory is writable.
pub fn check_storage_writable(dir: &Path) -> bool {
    let probe = dir.join(".health_probe");
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

/// Get free bytes on the filesystem containing `path`.
#[cfg(unix)]
pub fn disk_free_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) == 0 {
            #[allow(clippy::unnecessary_cast)]
            Some(stat.f_bavail as u64 * stat.f_frsize as u64)
        } else {
            None
        }
    }
}

#[cfg(not(unix))]
pub fn disk_free_bytes(_path: &Path) -> Option<u64> {
    None
}

/// Get the RSS (resident set size) of this process in bytes.
#[cfg(target_os = "macos")]
pub fn memory_rss_bytes() -> Option<u64> {
    // Use mach_task_info on macOS
    unsafe {
        #[allow(deprecated)]
        let task = libc::mach_task_self();
        let mut info: libc::mach_task_basic_info_data_t = std::mem::zeroed();
        let mut count = (std::mem::size_of::<libc::mach_task_basic_info_data_t>()
            / std::mem::size_of::<libc::natural_t>())
            as libc::mach_msg_type_number_t;
        let kr = libc::task_info(
            task,
            libc::MACH_TASK_BASIC_INFO,
            &mut info as *mut _ as libc::task_info_t,
            &mut count,
        );
        if kr == libc::KERN_SUCCESS {
            Some(info.resident_size)
        } else {
            None
        }
    }
}

#[cfg(target_os = "linux")]
pub fn memory_rss_bytes() -> Option<u64> {
    // Parse /proc/self/status for VmRSS
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb_str = rest.trim().trim_end_matches(" kB").trim();
            let kb: u64 = kb_str.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn memory_rss_bytes() -> Option<u64> {
    None
}

/// Count open file descriptors for this process.
#[cfg(target_os = "linux")]
pub fn open_fd_count() -> Option<u64> {
    std::fs::read_dir("/proc/self/fd")
        .ok()
        .map(|entries| entries.count() as u64)
}

#[cfg(target_os = "macos")]
pub fn open_fd_count() -> Option<u64> {
    // Use proc_pidinfo on macOS
    unsafe {
        let pid = libc::getpid();
        let buffer_size =
            libc::proc_pidinfo(pid, libc::PROC_PIDLISTFDS, 0, std::ptr::null_mut(), 0);
        if buffer_size <= 0 {
            return None;
        }
        let count = buffer_size as u64 / std::mem::size_of::<libc::proc_fdinfo>() as u64;
        Some(count)
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn open_fd_count() -> Option<u64> {
    None
}

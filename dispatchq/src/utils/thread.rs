//! OS-level thread helpers: kernel-visible thread naming and the
//! best-effort QoS-to-priority mapping.

use crate::queue::QosClass;
use anyhow::Result;

// pthread names are limited to 16 bytes, including the null terminator.
#[cfg(target_os = "linux")]
const MAX_PTHREAD_NAME_LEN: usize = 16;

/// Names the calling thread at the OS level, truncating to the pthread
/// limit.
///
/// Worker threads also carry a std-level name through `thread::Builder`,
/// but the kernel-visible name is what debuggers and `/proc` report;
/// setting it here keeps the two in sync even for names longer than the
/// pthread cap. No-op where no pthread naming API exists.
#[cfg(target_os = "linux")]
pub fn set_current_thread_name(name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_PTHREAD_NAME_LEN - 1);

    // Zero-initialized, so the buffer stays null-terminated as long as at
    // most `MAX_PTHREAD_NAME_LEN - 1` bytes are written.
    let mut buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];
    for (dst, src) in buf.iter_mut().zip(&bytes[..len]) {
        *dst = *src as libc::c_char;
    }

    unsafe {
        libc::pthread_setname_np(libc::pthread_self(), buf.as_ptr());
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_name(_name: &str) {}

/// Reads the calling thread's OS-level name.
///
/// Unlike `thread::current().name()`, this also reports names for threads
/// this crate did not spawn.
#[cfg(target_os = "linux")]
pub fn get_current_thread_name() -> Result<String> {
    use anyhow::anyhow;
    use std::ffi::CStr;

    let mut buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];
    let ret = unsafe {
        libc::pthread_getname_np(libc::pthread_self(), buf.as_mut_ptr(), MAX_PTHREAD_NAME_LEN)
    };
    if ret != 0 {
        return Err(anyhow!("pthread_getname_np failed with error code {ret}"));
    }

    // The buffer is null-terminated: it was zero-initialized and the
    // kernel caps names below its length.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_str()?.to_string())
}

#[cfg(not(target_os = "linux"))]
pub fn get_current_thread_name() -> Result<String> {
    use anyhow::anyhow;

    std::thread::current()
        .name()
        .map(String::from)
        .ok_or_else(|| anyhow!("thread has no name"))
}

/// Best-effort mapping of a [`QosClass`] onto the OS scheduler for the
/// calling thread.
///
/// Linux has no per-thread QoS API, so classes map onto nice values via
/// `setpriority(2)`, which acts on the calling thread when given a zero id.
/// Raising priority above normal needs `CAP_SYS_NICE`; failures are
/// ignored, the hint is advisory.
#[cfg(target_os = "linux")]
pub(crate) fn apply_qos_class(qos: QosClass) {
    let nice: libc::c_int = match qos {
        QosClass::Lowest => 19,
        QosClass::Low => 10,
        QosClass::Normal => return,
        QosClass::High => -10,
        QosClass::Max => -20,
    };

    unsafe {
        libc::setpriority(libc::PRIO_PROCESS as _, 0, nice);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn apply_qos_class(_qos: QosClass) {}

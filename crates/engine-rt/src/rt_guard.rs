//! RT-safety helpers: entering the hardened realtime scheduling mode the
//! engine's audio thread runs under, and (debug/test builds only) detecting
//! allocation on a thread that must not allocate.

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[inline]
fn enable_denormal_kill_once() {
    unsafe {
        #[cfg(target_arch = "x86_64")]
        {
            use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
            let mut csr = _mm_getcsr();
            csr |= 1 << 6; // DAZ
            csr |= 1 << 15; // FTZ
            _mm_setcsr(csr);
        }
        #[cfg(target_arch = "x86")]
        {
            use std::arch::x86::{_mm_getcsr, _mm_setcsr};
            let mut csr = _mm_getcsr();
            csr |= 1 << 6; // DAZ
            csr |= 1 << 15; // FTZ
            _mm_setcsr(csr);
        }
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline]
fn enable_denormal_kill_once() {}

/// Locks the process's memory and elevates the current thread to
/// `SCHED_FIFO`, then enables FTZ/DAZ so subnormal floats never trigger the
/// microcode slow path inside the opcode interpreter.
///
/// Best-effort: every syscall failure here is swallowed rather than
/// propagated, since the engine still functions (just with worse worst-case
/// latency) under a scheduler that refuses the elevation, e.g. inside an
/// unprivileged container.
///
/// # Safety
/// Must be called once, from the thread that will run `process_block`,
/// before the first block is processed.
pub unsafe fn enter_hard_rt(priority: i32) {
    #[cfg(target_os = "linux")]
    {
        let _ = libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE);
        let sp = libc::sched_param {
            sched_priority: priority,
        };
        let _ = libc::sched_setscheduler(0, libc::SCHED_FIFO, &sp);
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = priority;
    }
    enable_denormal_kill_once();
}

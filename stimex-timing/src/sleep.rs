//! Platform sleep used for the coarse phase of a [`crate::WaitLock`] wait.
//!
//! Only ever asked to sleep for spans that end well before the deadline, so
//! oversleeping by the scheduler quantum is harmless.

use std::time::Duration;

pub fn coarse_sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    #[cfg(all(target_os = "windows", feature = "high_precision_timer"))]
    windows_sleep(duration);
    #[cfg(all(target_os = "linux", feature = "high_precision_timer"))]
    linux_sleep(duration);
    #[cfg(all(target_os = "macos", feature = "high_precision_timer"))]
    macos_sleep(duration);
    #[cfg(not(all(
        any(target_os = "windows", target_os = "linux", target_os = "macos"),
        feature = "high_precision_timer"
    )))]
    std::thread::sleep(duration);
}

#[cfg(all(target_os = "windows", feature = "high_precision_timer"))]
fn windows_sleep(duration: Duration) {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{
        CreateWaitableTimerW, INFINITE, SetWaitableTimer, WaitForSingleObject,
    };
    use windows::core::PCWSTR;

    // Negative due time is relative, in 100 ns intervals.
    let due_time = -((duration.as_nanos() / 100) as i64);

    unsafe {
        let Ok(timer) = CreateWaitableTimerW(None, true, PCWSTR::null()) else {
            std::thread::sleep(duration);
            return;
        };
        if SetWaitableTimer(timer, &due_time, 0, None, None, false).is_ok() {
            WaitForSingleObject(timer, INFINITE);
        } else {
            std::thread::sleep(duration);
        }
        let _ = CloseHandle(timer);
    }
}

#[cfg(all(target_os = "linux", feature = "high_precision_timer"))]
fn linux_sleep(duration: Duration) {
    use libc::{CLOCK_MONOTONIC, EINTR, clock_nanosleep, timespec};

    let mut req = timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    let mut rem = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    // clock_nanosleep reports the remainder when a signal cuts it short.
    loop {
        let rc = unsafe { clock_nanosleep(CLOCK_MONOTONIC, 0, &req, &mut rem) };
        if rc != EINTR {
            break;
        }
        req = rem;
    }
}

#[cfg(all(target_os = "macos", feature = "high_precision_timer"))]
fn macos_sleep(duration: Duration) {
    use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

    if duration.as_nanos() < 100_000 {
        unsafe {
            let start = mach_absolute_time();
            let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
            mach_timebase_info(&mut timebase);

            let target_ticks =
                duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;

            while mach_absolute_time() - start < target_ticks {
                std::hint::spin_loop();
            }
        }
    } else {
        std::thread::sleep(duration);
    }
}

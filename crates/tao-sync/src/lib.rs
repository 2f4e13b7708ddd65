//! Cross-process mutex, condition variable, and counting semaphore.
//!
//! Rust's standard library has no process-shared lock type, so these wrap
//! the host's `pthread`/POSIX-semaphore interface directly, exactly as
//! anticipated by the design notes: "not every target language exposes
//! process-shared mutexes in its standard library; the substrate may need
//! to call the host OS threading interface directly." Every type here is
//! meant to be placed at a fixed address inside a shared-memory region (see
//! `tao-shm`), not owned by a single process's heap, so construction is an
//! `unsafe fn init_at(place: *mut Self)` rather than an owning constructor.

use std::cell::UnsafeCell;
use std::time::Duration;
use tao_error::{ErrorKind, Result, TaoError};

/// Durations longer than this degrade a timed wait into an untimed one, per
/// the specification's documented degradation rule.
pub const ONE_YEAR_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Outcome of a bounded or nonblocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    TimedOut,
    WouldBlock,
}

fn pthread_cvt(rc: i32, function: &'static str) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(TaoError::new(function, ErrorKind::SystemError(rc)))
    }
}

fn errno_cvt(rc: i32, function: &'static str) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
        Err(TaoError::new(function, ErrorKind::SystemError(errno)))
    }
}

fn deadline_timespec(duration: Duration) -> Result<libc::timespec> {
    let t = tao_clock::absolute_deadline(duration.as_secs_f64())?;
    Ok(libc::timespec {
        tv_sec: t.sec as libc::time_t,
        tv_nsec: t.nsec as libc::c_long,
    })
}

// ---------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------

/// A process-shared mutex. Lives at a fixed address (typically inside a
/// shared-memory region) and is initialized in place with [`RawMutex::init_at`].
#[repr(transparent)]
pub struct RawMutex(UnsafeCell<libc::pthread_mutex_t>);

// SAFETY: the pthread mutex itself provides the mutual exclusion contract;
// concurrent access from multiple threads/processes is exactly what it is
// designed for.
unsafe impl Sync for RawMutex {}
unsafe impl Send for RawMutex {}

impl RawMutex {
    /// Initialize a process-shared mutex at `place`.
    ///
    /// # Safety
    /// `place` must point to valid, writable, suitably aligned memory for
    /// the lifetime of the mutex, and must not already hold an initialized
    /// mutex.
    pub unsafe fn init_at(place: *mut RawMutex) -> Result<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        pthread_cvt(
            libc::pthread_mutexattr_init(&mut attr),
            "pthread_mutexattr_init",
        )?;
        let set_shared = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if set_shared != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(TaoError::new(
                "pthread_mutexattr_setpshared",
                ErrorKind::SystemError(set_shared),
            ));
        }
        // Robust: a peer that dies while holding the lock must not wedge
        // every other attached process forever (S6).
        let set_robust = libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST);
        if set_robust != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(TaoError::new(
                "pthread_mutexattr_setrobust",
                ErrorKind::SystemError(set_robust),
            ));
        }
        let rc = libc::pthread_mutex_init((*place).0.get(), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        pthread_cvt(rc, "pthread_mutex_init")
    }

    /// Block until the mutex is acquired. If the previous owner died while
    /// holding it (`EOWNERDEAD`), the mutex is marked consistent and the
    /// lock is still granted — the data it protects is recovered field by
    /// field by whoever observes an unexpected state, not rolled back.
    pub fn lock(&self) -> Result<MutexGuard<'_>> {
        let rc = unsafe { libc::pthread_mutex_lock(self.0.get()) };
        if rc == libc::EOWNERDEAD {
            unsafe { libc::pthread_mutex_consistent(self.0.get()) };
            tracing::warn!("recovered mutex from owner that died while holding it");
            return Ok(MutexGuard { mutex: self });
        }
        pthread_cvt(rc, "pthread_mutex_lock")?;
        Ok(MutexGuard { mutex: self })
    }

    /// Acquire the mutex without blocking.
    pub fn try_lock(&self) -> Result<Option<MutexGuard<'_>>> {
        let rc = unsafe { libc::pthread_mutex_trylock(self.0.get()) };
        match rc {
            0 => Ok(Some(MutexGuard { mutex: self })),
            libc::EOWNERDEAD => {
                unsafe { libc::pthread_mutex_consistent(self.0.get()) };
                tracing::warn!("recovered mutex from owner that died while holding it");
                Ok(Some(MutexGuard { mutex: self }))
            }
            libc::EBUSY => Ok(None),
            other => Err(TaoError::new("pthread_mutex_trylock", ErrorKind::SystemError(other))),
        }
    }

    /// Destroy the mutex, retrying through transient `EBUSY` by briefly
    /// taking and releasing the lock, so destruction eventually succeeds as
    /// long as no peer holds the lock forever.
    ///
    /// # Safety
    /// No thread or process may use the mutex again after this call
    /// returns `Ok`.
    pub unsafe fn destroy(&self, wait: bool) -> Result<()> {
        loop {
            let rc = libc::pthread_mutex_destroy(self.0.get());
            if rc == 0 {
                return Ok(());
            }
            if rc == libc::EBUSY && wait {
                // A peer is mid-critical-section; wait for it to finish and retry.
                drop(self.lock()?);
                continue;
            }
            return Err(TaoError::new("pthread_mutex_destroy", ErrorKind::SystemError(rc)));
        }
    }

    pub(crate) fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.0.get()
    }
}

/// RAII guard returned by [`RawMutex::lock`]/[`RawMutex::try_lock`].
pub struct MutexGuard<'a> {
    mutex: &'a RawMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw());
        }
    }
}

impl<'a> MutexGuard<'a> {
    /// Wait on `cond` while holding this mutex, consuming and returning the
    /// guard the way `pthread_cond_wait` hands the lock back on wake.
    pub fn wait(self, cond: &RawCondvar) -> Result<MutexGuard<'a>> {
        cond.wait(self)
    }

    /// Bounded wait on `cond`; see [`RawCondvar::timed_wait`].
    pub fn timed_wait(self, cond: &RawCondvar, duration: Duration) -> Result<(MutexGuard<'a>, WaitOutcome)> {
        cond.timed_wait(self, duration)
    }

    pub(crate) fn mutex(&self) -> &'a RawMutex {
        self.mutex
    }
}

// ---------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------

/// A process-shared condition variable.
#[repr(transparent)]
pub struct RawCondvar(UnsafeCell<libc::pthread_cond_t>);

unsafe impl Sync for RawCondvar {}
unsafe impl Send for RawCondvar {}

impl RawCondvar {
    /// # Safety
    /// `place` must point to valid, writable, suitably aligned memory for
    /// the lifetime of the condvar, and must not already hold an
    /// initialized condvar.
    pub unsafe fn init_at(place: *mut RawCondvar) -> Result<()> {
        let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
        pthread_cvt(
            libc::pthread_condattr_init(&mut attr),
            "pthread_condattr_init",
        )?;
        let set_shared = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if set_shared != 0 {
            libc::pthread_condattr_destroy(&mut attr);
            return Err(TaoError::new(
                "pthread_condattr_setpshared",
                ErrorKind::SystemError(set_shared),
            ));
        }
        let rc = libc::pthread_cond_init((*place).0.get(), &attr);
        libc::pthread_condattr_destroy(&mut attr);
        pthread_cvt(rc, "pthread_cond_init")
    }

    pub fn signal(&self) -> Result<()> {
        pthread_cvt(unsafe { libc::pthread_cond_signal(self.0.get()) }, "pthread_cond_signal")
    }

    pub fn broadcast(&self) -> Result<()> {
        pthread_cvt(
            unsafe { libc::pthread_cond_broadcast(self.0.get()) },
            "pthread_cond_broadcast",
        )
    }

    /// Wait for a signal/broadcast, unconditionally.
    pub fn wait<'a>(&self, guard: MutexGuard<'a>) -> Result<MutexGuard<'a>> {
        let mutex = guard.mutex();
        let rc = unsafe { libc::pthread_cond_wait(self.0.get(), mutex.raw()) };
        std::mem::forget(guard); // the mutex is still locked; don't double-unlock
        pthread_cvt(rc, "pthread_cond_wait")?;
        Ok(MutexGuard { mutex })
    }

    /// Wait up to `duration`. Durations over [`ONE_YEAR_SECS`] degrade to an
    /// untimed [`RawCondvar::wait`], per the documented degradation rule.
    pub fn timed_wait<'a>(
        &self,
        guard: MutexGuard<'a>,
        duration: Duration,
    ) -> Result<(MutexGuard<'a>, WaitOutcome)> {
        if duration.as_secs_f64() > ONE_YEAR_SECS {
            let guard = self.wait(guard)?;
            return Ok((guard, WaitOutcome::Acquired));
        }
        let mutex = guard.mutex();
        let ts = deadline_timespec(duration)?;
        let rc = unsafe { libc::pthread_cond_timedwait(self.0.get(), mutex.raw(), &ts) };
        std::mem::forget(guard);
        match rc {
            0 => Ok((MutexGuard { mutex }, WaitOutcome::Acquired)),
            libc::ETIMEDOUT => Ok((MutexGuard { mutex }, WaitOutcome::TimedOut)),
            other => Err(TaoError::new("pthread_cond_timedwait", ErrorKind::SystemError(other))),
        }
    }

    /// # Safety
    /// No thread or process may use the condvar again after this call
    /// returns `Ok`.
    pub unsafe fn destroy(&self) -> Result<()> {
        pthread_cvt(libc::pthread_cond_destroy(self.0.get()), "pthread_cond_destroy")
    }
}

// ---------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------

/// A process-shared counting semaphore.
#[repr(transparent)]
pub struct RawSemaphore(UnsafeCell<libc::sem_t>);

unsafe impl Sync for RawSemaphore {}
unsafe impl Send for RawSemaphore {}

impl RawSemaphore {
    /// # Safety
    /// `place` must point to valid, writable, suitably aligned memory for
    /// the lifetime of the semaphore, and must not already hold an
    /// initialized semaphore.
    pub unsafe fn init_at(place: *mut RawSemaphore, initial_value: u32) -> Result<()> {
        let rc = libc::sem_init((*place).0.get(), 1, initial_value);
        errno_cvt(rc, "sem_init")
    }

    pub fn post(&self) -> Result<()> {
        errno_cvt(unsafe { libc::sem_post(self.0.get()) }, "sem_post")
    }

    /// Current count, read for the "post only if currently zero" pattern.
    pub fn value(&self) -> Result<i32> {
        let mut val: i32 = 0;
        let rc = unsafe { libc::sem_getvalue(self.0.get(), &mut val) };
        errno_cvt(rc, "sem_getvalue")?;
        Ok(val)
    }

    /// Block until a post is available. A signal interrupting the wait
    /// (`EINTR`) surfaces as an error rather than being retried
    /// internally — see the cancellation contract in the specification.
    pub fn wait(&self) -> Result<()> {
        let rc = unsafe { libc::sem_wait(self.0.get()) };
        errno_cvt(rc, "sem_wait")
    }

    /// Nonblocking acquire: never sleeps.
    pub fn try_wait(&self) -> Result<WaitOutcome> {
        let rc = unsafe { libc::sem_trywait(self.0.get()) };
        if rc == 0 {
            return Ok(WaitOutcome::Acquired);
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
        if errno == libc::EAGAIN {
            Ok(WaitOutcome::WouldBlock)
        } else {
            Err(TaoError::new("sem_trywait", ErrorKind::SystemError(errno)))
        }
    }

    /// Bounded wait. Sub-nanosecond durations short-circuit to
    /// [`RawSemaphore::try_wait`]; durations over [`ONE_YEAR_SECS`] degrade
    /// to [`RawSemaphore::wait`], both per the documented degradation rule.
    pub fn timed_wait(&self, duration: Duration) -> Result<WaitOutcome> {
        if duration.as_nanos() == 0 {
            return self.try_wait();
        }
        if duration.as_secs_f64() > ONE_YEAR_SECS {
            self.wait()?;
            return Ok(WaitOutcome::Acquired);
        }
        let ts = deadline_timespec(duration)?;
        let rc = unsafe { libc::sem_timedwait(self.0.get(), &ts) };
        if rc == 0 {
            return Ok(WaitOutcome::Acquired);
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
        if errno == libc::ETIMEDOUT {
            Ok(WaitOutcome::TimedOut)
        } else {
            Err(TaoError::new("sem_timedwait", ErrorKind::SystemError(errno)))
        }
    }

    /// # Safety
    /// No thread or process may use the semaphore again after this call
    /// returns `Ok`.
    pub unsafe fn destroy(&self) -> Result<()> {
        errno_cvt(libc::sem_destroy(self.0.get()), "sem_destroy")
    }
}

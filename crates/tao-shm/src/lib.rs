//! The shared-object substrate: create/attach/detach a typed, reference
//! counted region backed by a single System V shared-memory segment.
//!
//! System V shared memory (`shmget`/`shmat`/`shmdt`/`shmctl`) is used
//! rather than POSIX `shm_open` because its identifier (`shmid`) is a
//! small integer handle independent of any filesystem-visible name, and
//! `shmctl(IPC_RMID)` can be issued immediately at creation time without
//! preventing later attaches by identifier — the kernel only actually
//! destroys the segment once the last process detaches. That is exactly
//! the "mark for removal on last detach" lifecycle the specification
//! describes, delegated straight to the host OS.

use std::mem::size_of;
use std::sync::atomic::{AtomicI32, Ordering};

use tao_error::{ErrorKind, Result, TaoError};
use tao_sync::RawMutex;

/// High 24 bits of every region's `type` field.
pub const MAGIC24: u32 = 0x7A_544F;

/// The type-specific variant a region carries, packed into the low 8 bits
/// of the header's `type` field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    BasicObject = 0,
    Array = 1,
    Camera = 2,
}

impl Variant {
    fn from_u8(b: u8) -> Option<Variant> {
        match b {
            0 => Some(Variant::BasicObject),
            1 => Some(Variant::Array),
            2 => Some(Variant::Camera),
            _ => None,
        }
    }
}

fn pack_type(variant: Variant) -> u32 {
    (MAGIC24 << 8) | variant as u32
}

fn unpack_type(typ: u32) -> Option<Variant> {
    if typ >> 8 == MAGIC24 {
        Variant::from_u8((typ & 0xFF) as u8)
    } else {
        None
    }
}

/// POSIX-style permission bits applied to a freshly created segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perm(pub u32);

impl Default for Perm {
    fn default() -> Self {
        Perm(0o600)
    }
}

/// The fixed header every shared region begins with.
///
/// `refs`, `ident`, `size`, and `typ` are immutable after creation except
/// that `refs` mutates while `lock` is held; it is stored as an
/// [`AtomicI32`] purely so Rust's aliasing model permits lock-free reads of
/// it from code performing the specification's "peek before locking"
/// fast-path checks, not to relax the "mutate only under lock" contract.
#[repr(C)]
pub struct Header {
    pub lock: RawMutex,
    refs: AtomicI32,
    ident: i64,
    size: u64,
    typ: u32,
    _reserved: u32,
}

impl Header {
    #[must_use]
    pub fn ident(&self) -> i64 {
        self.ident
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn variant(&self) -> Option<Variant> {
        unpack_type(self.typ)
    }

    /// A racy, lock-free peek at the reference count, used only for the
    /// fast-path "is this obviously already destroyed" check before
    /// acquiring the lock. The authoritative check happens under `lock`.
    #[must_use]
    pub fn refs_peek(&self) -> i32 {
        self.refs.load(Ordering::Relaxed)
    }
}

const HEADER_SIZE: usize = size_of::<Header>();

/// An owning, move-only attachment to a shared region.
///
/// Cloning calls [`Region::attach`] under the hood (incrementing the
/// remote reference count); dropping without an explicit
/// [`Region::detach_with`] call still runs the generic detach path via
/// `Drop`, so a region is never leaked even if a caller forgets to call
/// detach explicitly.
pub struct Region {
    ptr: *mut u8,
    shmid: i32,
    size: usize,
    /// Set once `detach_with` has run, so `Drop` does not double-detach.
    detached: bool,
}

// SAFETY: the region's header lock makes every cross-process mutation
// safe; `Region` itself holds only a raw pointer and an OS handle, both of
// which are safe to move or hand to another thread.
unsafe impl Send for Region {}

impl Region {
    /// Create a new region of `total_size` bytes carrying `variant`,
    /// running `init` to fill in the type-specific body once the header
    /// has been written. `total_size` must be at least the header size.
    pub fn create(
        variant: Variant,
        total_size: usize,
        perm: Perm,
        init: impl FnOnce(*mut u8, usize) -> Result<()>,
    ) -> Result<Region> {
        if total_size < HEADER_SIZE {
            return Err(TaoError::new("Region::create", ErrorKind::BadSize));
        }
        let shmid = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                total_size,
                libc::IPC_CREAT | 0o600 | (perm.0 & 0o777) as i32,
            )
        };
        if shmid < 0 {
            return Err(system_error("shmget"));
        }
        let raw = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if raw as isize == -1 {
            unsafe {
                libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
            }
            return Err(system_error("shmat"));
        }
        let ptr = raw.cast::<u8>();

        // Mark for removal now: the kernel destroys the segment only once
        // every attached process has detached, but other processes may
        // still `shmat` by `shmid` until that happens.
        if unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) } != 0 {
            let err = system_error("shmctl(IPC_RMID)");
            unsafe {
                libc::shmdt(raw);
            }
            return Err(err);
        }

        unsafe {
            std::ptr::write_bytes(ptr, 0, total_size);
        }
        let header = ptr.cast::<Header>();
        unsafe {
            RawMutex::init_at(std::ptr::addr_of_mut!((*header).lock)).map_err(|e| {
                libc::shmdt(raw);
                e
            })?;
            std::ptr::addr_of_mut!((*header).refs).write(AtomicI32::new(1));
            std::ptr::addr_of_mut!((*header).ident).write(shmid as i64);
            std::ptr::addr_of_mut!((*header).size).write(total_size as u64);
            std::ptr::addr_of_mut!((*header).typ).write(pack_type(variant));
        }

        if let Err(e) = init(ptr, total_size) {
            unsafe {
                libc::shmdt(raw);
            }
            return Err(e);
        }

        tracing::info!(shmid, total_size, ?variant, "created shared region");
        Ok(Region {
            ptr,
            shmid,
            size: total_size,
            detached: false,
        })
    }

    /// Attach an existing region by its `ident` (the OS-assigned `shmid`),
    /// verifying it carries `expected_variant` and incrementing its
    /// reference count under its header lock.
    pub fn attach(ident: i64, expected_variant: Variant) -> Result<Region> {
        let shmid = ident as i32;
        let raw = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if raw as isize == -1 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            let kind = if errno == libc::EINVAL || errno == libc::ENOENT {
                ErrorKind::Destroyed
            } else {
                ErrorKind::SystemError(errno)
            };
            return Err(TaoError::new("shmat", kind));
        }
        let ptr = raw.cast::<u8>();

        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        if unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) } != 0 {
            let err = system_error("shmctl(IPC_STAT)");
            unsafe { libc::shmdt(raw) };
            return Err(err);
        }

        let header = ptr.cast::<Header>();
        let header_ref = unsafe { &*header };

        if header_ref.variant().is_none() {
            unsafe { libc::shmdt(raw) };
            return Err(TaoError::new("Region::attach", ErrorKind::BadMagic));
        }
        if header_ref.variant() != Some(expected_variant) {
            unsafe { libc::shmdt(raw) };
            return Err(TaoError::new("Region::attach", ErrorKind::BadType));
        }
        if header_ref.size() != ds.shm_segsz as u64 {
            unsafe { libc::shmdt(raw) };
            return Err(TaoError::new("Region::attach", ErrorKind::BadSize));
        }
        if header_ref.refs_peek() <= 0 {
            unsafe { libc::shmdt(raw) };
            return Err(TaoError::new("Region::attach", ErrorKind::Destroyed));
        }

        {
            let guard = header_ref.lock.lock().map_err(|e| {
                unsafe { libc::shmdt(raw) };
                e
            })?;
            if header_ref.refs_peek() <= 0 {
                drop(guard);
                unsafe { libc::shmdt(raw) };
                return Err(TaoError::new("Region::attach", ErrorKind::Destroyed));
            }
            header_ref.refs.fetch_add(1, Ordering::SeqCst);
        }

        Ok(Region {
            ptr,
            shmid,
            size: header_ref.size() as usize,
            detached: false,
        })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        unsafe { &*self.ptr.cast::<Header>() }
    }

    #[must_use]
    pub fn ident(&self) -> i64 {
        self.shmid as i64
    }

    /// Detach this attachment. `on_last_reference` runs after the header
    /// mutex has been destroyed but before the segment is unmapped, and
    /// only if this was the attachment that brought the reference count to
    /// zero — the hook for a type's embedded primitives (e.g. a camera's
    /// semaphores) to be torn down.
    pub fn detach_with(mut self, on_last_reference: impl FnOnce(&Header)) -> Result<()> {
        self.detach_inner(on_last_reference)
    }

    fn detach_inner(&mut self, on_last_reference: impl FnOnce(&Header)) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        let header = self.header();
        let remaining = {
            let _guard = header.lock.lock()?;
            header.refs.fetch_sub(1, Ordering::SeqCst) - 1
        };
        if remaining == 0 {
            unsafe {
                header.lock.destroy(true)?;
            }
            on_last_reference(header);
            tracing::info!(shmid = self.shmid, "last reference dropped, segment will be reclaimed");
        }
        unsafe {
            libc::shmdt(self.ptr.cast());
        }
        self.detached = true;
        Ok(())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if !self.detached {
            if let Err(err) = self.detach_inner(|_| {}) {
                tracing::warn!(shmid = self.shmid, %err, "error detaching region on drop");
            }
        }
    }
}

fn system_error(function: &'static str) -> TaoError {
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
    TaoError::new(function, ErrorKind::SystemError(errno))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_attach_share_payload() {
        let region = Region::create(Variant::BasicObject, HEADER_SIZE + 64, Perm::default(), |ptr, len| {
            unsafe { *ptr.add(HEADER_SIZE) = 0xAB };
            assert!(len >= HEADER_SIZE + 64);
            Ok(())
        })
        .unwrap();
        assert_eq!(region.header().refs_peek(), 1);
        let ident = region.ident();

        let attached = Region::attach(ident, Variant::BasicObject).unwrap();
        assert_eq!(attached.header().refs_peek(), 2);
        unsafe {
            assert_eq!(*attached.as_ptr().add(HEADER_SIZE), 0xAB);
        }

        attached.detach_with(|_| {}).unwrap();
        assert_eq!(region.header().refs_peek(), 1);
        region.detach_with(|_| {}).unwrap();
    }

    #[test]
    fn attach_wrong_variant_fails_without_incrementing_refs() {
        let region = Region::create(Variant::Array, HEADER_SIZE, Perm::default(), |_, _| Ok(())).unwrap();
        let ident = region.ident();
        let err = Region::attach(ident, Variant::Camera).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadType);
        assert_eq!(region.header().refs_peek(), 1);
        region.detach_with(|_| {}).unwrap();
    }

    #[test]
    fn attach_after_final_detach_reports_destroyed() {
        let region = Region::create(Variant::BasicObject, HEADER_SIZE, Perm::default(), |_, _| Ok(())).unwrap();
        let ident = region.ident();
        region.detach_with(|_| {}).unwrap();

        let err = Region::attach(ident, Variant::BasicObject).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Destroyed | ErrorKind::SystemError(_)));
    }

    #[test]
    fn attach_balance_p1() {
        let region = Region::create(Variant::BasicObject, HEADER_SIZE, Perm::default(), |_, _| Ok(())).unwrap();
        let mut attachments = Vec::new();
        for _ in 0..5 {
            attachments.push(Region::attach(region.ident(), Variant::BasicObject).unwrap());
        }
        assert_eq!(region.header().refs_peek(), 6);
        for a in attachments.drain(0..3) {
            a.detach_with(|_| {}).unwrap();
        }
        assert_eq!(region.header().refs_peek(), 3);
        for a in attachments {
            a.detach_with(|_| {}).unwrap();
        }
        assert_eq!(region.header().refs_peek(), 1);
        region.detach_with(|_| {}).unwrap();
    }
}

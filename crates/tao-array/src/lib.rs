//! A shared object whose payload is an aligned, contiguous array of pixels
//! (or any other element type), carrying shape metadata, writer/reader
//! counts, a monotone publication counter, and a capture timestamp.

use tao_error::{bail, ErrorKind, Result};
use tao_geometry::ElementType;
use tao_shm::{Perm, Region, Variant};

pub const MAX_NDIMS: usize = 5;

#[repr(C)]
struct RawArrayFields {
    eltype: u32,
    ndims: u32,
    nelem: i64,
    dims: [i64; MAX_NDIMS],
    nwriters: i32,
    nreaders: i32,
    counter: i64,
    ts_sec: i64,
    ts_nsec: i64,
    payload_offset: u64,
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// A reference-counted, cross-process-lockable multi-dimensional array.
///
/// `eltype`, `nelem`, `ndims`, `dims`, and `payload_offset` are immutable
/// after creation and read without the lock; `nwriters`, `nreaders`,
/// `counter`, and the timestamp are mutated only while holding [`lock`](SharedArray::lock).
pub struct SharedArray {
    region: Region,
}

impl SharedArray {
    fn header_size() -> usize {
        std::mem::size_of::<tao_shm::Header>()
    }

    fn fields_ptr(&self) -> *mut RawArrayFields {
        unsafe { self.region.as_ptr().add(Self::header_size()).cast::<RawArrayFields>() }
    }

    fn fields(&self) -> &RawArrayFields {
        unsafe { &*self.fields_ptr() }
    }

    /// Allocate a new array of `eltype` with the given shape. `dims.len()`
    /// is the rank and must be in `[1, MAX_NDIMS]`; every dimension must be
    /// positive. `nelem` overflow (the running product exceeding `i64::MAX`)
    /// is rejected as `BadSize`.
    pub fn create(eltype: ElementType, dims: &[i64], perm: Perm) -> Result<SharedArray> {
        if dims.is_empty() || dims.len() > MAX_NDIMS {
            return bail("SharedArray::create", ErrorKind::BadRank);
        }
        let mut nelem: i64 = 1;
        for &d in dims {
            if d <= 0 {
                return bail("SharedArray::create", ErrorKind::BadSize);
            }
            if nelem > i64::MAX / d {
                return bail("SharedArray::create", ErrorKind::BadSize);
            }
            nelem *= d;
        }

        let header_size = Self::header_size();
        let fields_size = std::mem::size_of::<RawArrayFields>();
        let payload_offset = round_up(header_size + fields_size, 32);
        let total = payload_offset + nelem as usize * eltype.byte_size();

        let mut dims_arr = [1i64; MAX_NDIMS];
        dims_arr[..dims.len()].copy_from_slice(dims);
        let ndims = dims.len() as u32;

        let region = Region::create(Variant::Array, total, perm, |ptr, _len| {
            unsafe {
                let fields = ptr.add(header_size).cast::<RawArrayFields>();
                fields.write(RawArrayFields {
                    eltype: eltype.tag(),
                    ndims,
                    nelem,
                    dims: dims_arr,
                    nwriters: 0,
                    nreaders: 0,
                    counter: 0,
                    ts_sec: 0,
                    ts_nsec: 0,
                    payload_offset: payload_offset as u64,
                });
            }
            Ok(())
        })?;
        Ok(SharedArray { region })
    }

    /// Attach an existing array by its region identifier.
    pub fn attach(ident: i64) -> Result<SharedArray> {
        let region = Region::attach(ident, Variant::Array)?;
        Ok(SharedArray { region })
    }

    /// Release this attachment. The backing segment is reclaimed by the OS
    /// once the last attachment detaches.
    pub fn detach(self) -> Result<()> {
        self.region.detach_with(|_| {})
    }

    #[must_use]
    pub fn ident(&self) -> i64 {
        self.region.ident()
    }

    #[must_use]
    pub fn eltype(&self) -> ElementType {
        ElementType::from_tag(self.fields().eltype).unwrap_or(ElementType::UInt8)
    }

    #[must_use]
    pub fn ndims(&self) -> usize {
        self.fields().ndims as usize
    }

    #[must_use]
    pub fn nelem(&self) -> i64 {
        self.fields().nelem
    }

    #[must_use]
    pub fn size_of_dim(&self, d: usize) -> i64 {
        if d < self.ndims() {
            self.fields().dims[d]
        } else {
            1
        }
    }

    /// Matches shape: same element type and the same dims over `ndims`.
    #[must_use]
    pub fn shape_matches(&self, eltype: ElementType, dims: &[i64]) -> bool {
        self.eltype() == eltype && self.ndims() == dims.len() && (0..dims.len()).all(|d| self.size_of_dim(d) == dims[d])
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        let off = self.fields().payload_offset as usize;
        let len = self.nelem() as usize * self.eltype().byte_size();
        unsafe { std::slice::from_raw_parts(self.region.as_ptr().add(off), len) }
    }

    fn data_mut_raw(&self) -> &mut [u8] {
        let off = self.fields().payload_offset as usize;
        let len = self.nelem() as usize * self.eltype().byte_size();
        unsafe { std::slice::from_raw_parts_mut(self.region.as_ptr().add(off), len) }
    }

    /// Acquire the array's lock, guarding `nwriters`/`nreaders`/`counter`/
    /// timestamp and, conventionally, the payload while a writer is active.
    pub fn lock(&self) -> Result<ArrayGuard<'_>> {
        let guard = self.region.header().lock.lock()?;
        Ok(ArrayGuard { _guard: guard, array: self })
    }
}

/// RAII guard granting access to an array's mutable counters while its
/// lock is held.
pub struct ArrayGuard<'a> {
    _guard: tao_sync::MutexGuard<'a>,
    array: &'a SharedArray,
}

impl ArrayGuard<'_> {
    #[must_use]
    pub fn nwriters(&self) -> i32 {
        self.array.fields().nwriters
    }

    pub fn set_nwriters(&mut self, v: i32) {
        unsafe { (*self.array.fields_ptr()).nwriters = v };
    }

    #[must_use]
    pub fn nreaders(&self) -> i32 {
        self.array.fields().nreaders
    }

    pub fn set_nreaders(&mut self, v: i32) {
        unsafe { (*self.array.fields_ptr()).nreaders = v };
    }

    #[must_use]
    pub fn counter(&self) -> i64 {
        self.array.fields().counter
    }

    pub fn set_counter(&mut self, v: i64) {
        unsafe { (*self.array.fields_ptr()).counter = v };
    }

    #[must_use]
    pub fn timestamp(&self) -> tao_clock::Time {
        let f = self.array.fields();
        tao_clock::Time { sec: f.ts_sec, nsec: f.ts_nsec }
    }

    pub fn set_timestamp(&mut self, t: tao_clock::Time) {
        unsafe {
            let f = &mut *self.array.fields_ptr();
            f.ts_sec = t.sec;
            f.ts_nsec = t.nsec;
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.array.data()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.array.data_mut_raw()
    }
}

//! The producer-side frame ring: a fixed-depth pool of shared arrays that
//! the acquisition loop cycles through, plus one spare kept ready so
//! `fetch_next` never blocks on allocation in the common case.

use tao_array::SharedArray;
use tao_clock::Time;
use tao_error::{bail, ErrorKind, Result};
use tao_geometry::{ElementType, PixelEncoding};
use tao_shm::Perm;

use crate::descriptor::{CameraSnapshot, DescriptorGuard};

/// The array element type a decoded frame of this encoding is stored as.
/// Independent of the wire encoding's packing: `Mono12Packed` still decodes
/// to 16-bit samples once unpacked.
#[must_use]
pub fn element_type_for_encoding(encoding: PixelEncoding) -> ElementType {
    match encoding {
        PixelEncoding::Mono8 | PixelEncoding::RGB8Packed => ElementType::UInt8,
        PixelEncoding::Mono32 => ElementType::UInt32,
        PixelEncoding::Float32 => ElementType::Float32,
        PixelEncoding::Float64 => ElementType::Float64,
        _ => ElementType::UInt16,
    }
}

/// The canonical unpacked encoding a decoded buffer's element type stands
/// in for when handed to [`tao_convert::convert`] as the destination.
fn canonical_encoding(eltype: ElementType) -> PixelEncoding {
    match eltype {
        ElementType::UInt8 => PixelEncoding::Mono8,
        ElementType::UInt32 => PixelEncoding::Mono32,
        ElementType::Float32 => PixelEncoding::Float32,
        ElementType::Float64 => PixelEncoding::Float64,
        _ => PixelEncoding::Mono16,
    }
}

/// Decode one raw buffer straight from the device into a buffer the ring
/// handed out, using the conversion kernel's dispatch table. `stride` is the
/// source row stride in bytes; the destination is always tightly packed.
pub fn decode_raw_into(dest: &SharedArray, raw: &[u8], source_encoding: PixelEncoding, stride: usize) -> Result<()> {
    let width = dest.size_of_dim(0) as usize;
    let height = dest.size_of_dim(1).max(1) as usize;
    let dest_encoding = canonical_encoding(dest.eltype());
    let mut guard = dest.lock()?;
    tao_convert::convert(guard.payload_mut(), dest_encoding, raw, source_encoding, width, height, stride)
}

/// A fixed-depth pool of shared frame buffers, cycled by a producer.
pub struct ProducerRing {
    ring: Vec<Option<SharedArray>>,
    spare: Option<SharedArray>,
    index: i64,
    perm: Perm,
}

impl ProducerRing {
    /// `nframes` must be at least 2: the ring needs room for the
    /// in-flight buffer and at least one already-published one a slow
    /// consumer might still be reading.
    pub fn new(nframes: usize, perm: Perm) -> Result<ProducerRing> {
        if nframes < 2 {
            return bail("ProducerRing::new", ErrorKind::BadSize);
        }
        Ok(ProducerRing {
            ring: (0..nframes).map(|_| None).collect(),
            spare: None,
            index: -1,
            perm,
        })
    }

    fn next_slot(&self) -> usize {
        let n = self.ring.len() as i64;
        ((self.index + 1).rem_euclid(n)) as usize
    }

    /// Choose the buffer the producer should decode the next frame into.
    ///
    /// Prefers recycling the slot the ring is about to overwrite, as long
    /// as no consumer still has it open (`nreaders`/`nwriters` both zero)
    /// and it isn't the descriptor's last-published frame (a consumer may
    /// be about to attach to it by identifier). Falls back to the spare,
    /// then to a fresh allocation, growing the shape to match `snapshot` in
    /// either case.
    pub fn fetch_next(&mut self, descriptor: &DescriptorGuard<'_>, snapshot: &CameraSnapshot) -> Result<SharedArray> {
        let eltype = element_type_for_encoding(snapshot.pixel_encoding);
        let dims = snapshot.frame_dims();
        let (last_ident, _) = descriptor.last_frame();
        let slot = self.next_slot();

        let recycled = match self.ring[slot].take() {
            Some(candidate) => self.try_recycle(candidate, last_ident, eltype, &dims)?,
            None => None,
        };

        let chosen = match recycled {
            Some(arr) => arr,
            None => self.take_spare_or_allocate(eltype, &dims)?,
        };

        let stored = SharedArray::attach(chosen.ident())?;
        self.ring[slot] = Some(stored);
        self.index = slot as i64;
        Ok(chosen)
    }

    fn try_recycle(
        &mut self,
        candidate: SharedArray,
        last_ident: i64,
        eltype: ElementType,
        dims: &[i64],
    ) -> Result<Option<SharedArray>> {
        if candidate.ident() == last_ident || !candidate.shape_matches(eltype, dims) {
            candidate.detach()?;
            return Ok(None);
        }
        let claimed = {
            let mut guard = candidate.lock()?;
            if guard.nreaders() != 0 || guard.nwriters() != 0 {
                false
            } else {
                guard.set_nwriters(1);
                true
            }
        };
        if !claimed {
            candidate.detach()?;
            return Ok(None);
        }
        Ok(Some(candidate))
    }

    fn take_spare_or_allocate(&mut self, eltype: ElementType, dims: &[i64]) -> Result<SharedArray> {
        let arr = match self.spare.take() {
            Some(spare) if spare.shape_matches(eltype, dims) => spare,
            Some(stale) => {
                stale.detach()?;
                SharedArray::create(eltype, dims, self.perm)?
            }
            None => SharedArray::create(eltype, dims, self.perm)?,
        };
        arr.lock()?.set_nwriters(1);
        Ok(arr)
    }

    /// Publish a frame the producer just finished decoding into `arr`.
    ///
    /// Validates the buffer's shape still matches the current contract,
    /// clears the writer flag, assigns the next monotone counter, stamps
    /// the capture time, records the frame as the descriptor's latest, and
    /// wakes every consumer notification semaphore that is currently at
    /// zero (a semaphore left above zero means a consumer hasn't drained
    /// the previous wakeup yet; posting again would only inflate its
    /// count). Finally tops the spare back up if this cycle consumed it.
    pub fn publish_next(
        &mut self,
        arr: &SharedArray,
        descriptor: &mut DescriptorGuard<'_>,
        timestamp: Time,
        snapshot: &CameraSnapshot,
    ) -> Result<()> {
        let eltype = element_type_for_encoding(snapshot.pixel_encoding);
        let dims = snapshot.frame_dims();
        if !arr.shape_matches(eltype, &dims) {
            return bail("publish_next", ErrorKind::BadSize);
        }

        let new_counter = {
            let mut guard = arr.lock()?;
            if guard.nwriters() != 1 || guard.nreaders() != 0 {
                return bail("publish_next", ErrorKind::AssertionFailed);
            }
            let (_, last_counter) = descriptor.last_frame();
            let new_counter = last_counter + 1;
            guard.set_nwriters(0);
            guard.set_counter(new_counter);
            guard.set_timestamp(timestamp);
            new_counter
        };
        descriptor.set_last_frame(arr.ident(), new_counter);

        let camera = descriptor.camera();
        for slot in 0..crate::descriptor::N_SEM {
            let sem = camera.semaphore(slot);
            if sem.value()? == 0 {
                sem.post()?;
            }
        }

        if self.spare.is_none() {
            self.spare = Some(SharedArray::create(eltype, &dims, self.perm)?);
        }
        Ok(())
    }
}

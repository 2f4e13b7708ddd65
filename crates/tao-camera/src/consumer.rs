//! The read side of a camera's shared fabric: attach to a running
//! descriptor, pick a notification slot, and wait for and attach to
//! newly published frames.

use std::time::Duration;

use tao_array::{ArrayGuard, SharedArray};
use tao_error::{bail, ErrorKind, Result};
use tao_sync::WaitOutcome;

use crate::descriptor::{CameraSnapshot, SharedCamera, N_SEM};

/// A frame a consumer has attached to, holding the array's `nreaders` count
/// above zero for as long as the handle lives. This is what makes the
/// producer's eviction check (`ring.rs`'s `try_recycle`, refusing a slot
/// with `nreaders() != 0`) actually protect a live reader, symmetric with
/// the writer side's `nwriters` bump during `fetch_next`/`publish_next`.
pub struct FrameHandle {
    array: SharedArray,
}

impl FrameHandle {
    fn attach(ident: i64) -> Result<FrameHandle> {
        let array = SharedArray::attach(ident)?;
        {
            let mut guard = array.lock()?;
            let n = guard.nreaders();
            guard.set_nreaders(n + 1);
        }
        Ok(FrameHandle { array })
    }

    /// Acquire the underlying array's lock.
    pub fn lock(&self) -> Result<ArrayGuard<'_>> {
        self.array.lock()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.array.data()
    }

    #[must_use]
    pub fn ident(&self) -> i64 {
        self.array.ident()
    }

    /// Release this reader's claim on the array and detach.
    pub fn detach(self) -> Result<()> {
        {
            let mut guard = self.array.lock()?;
            let n = guard.nreaders();
            guard.set_nreaders(n - 1);
        }
        self.array.detach()
    }
}

/// A single reader attached to a camera descriptor on one notification slot.
///
/// Tracks the counter of the last frame it consumed so repeated notification
/// posts (or a `try_wait` that races ahead of `publish_next`) never hand back
/// the same frame twice.
pub struct Consumer {
    camera: SharedCamera,
    slot: usize,
    last_counter: i64,
}

impl Consumer {
    /// Attach to a running descriptor on notification slot `slot`. Slots are
    /// cooperative: two consumers sharing a slot will each only see some of
    /// the wakeups, so callers coordinate slot assignment out of band.
    pub fn attach(ident: i64, slot: usize) -> Result<Consumer> {
        if slot >= N_SEM {
            return bail("Consumer::attach", ErrorKind::BadSize);
        }
        let camera = SharedCamera::attach(ident)?;
        let last_counter = camera.lock()?.last_frame().1;
        Ok(Consumer { camera, slot, last_counter })
    }

    pub fn detach(self) -> Result<()> {
        self.camera.detach()
    }

    #[must_use]
    pub fn ident(&self) -> i64 {
        self.camera.ident()
    }

    pub fn snapshot_config(&self) -> Result<CameraSnapshot> {
        Ok(self.camera.lock()?.snapshot())
    }

    pub fn wait(&self) -> Result<()> {
        self.camera.semaphore(self.slot).wait()
    }

    pub fn try_wait(&self) -> Result<WaitOutcome> {
        self.camera.semaphore(self.slot).try_wait()
    }

    pub fn timed_wait(&self, timeout: Duration) -> Result<WaitOutcome> {
        self.camera.semaphore(self.slot).timed_wait(timeout)
    }

    /// If a frame newer than the last one this consumer attached to has
    /// been published, attach to it and advance the tracked counter.
    /// Returns `Ok(None)` with no progress made if nothing new is
    /// available, or if the frame was already recycled by the time this
    /// call could attach (the ring ran ahead of a slow consumer).
    pub fn attach_latest_frame(&mut self) -> Result<Option<FrameHandle>> {
        let found = {
            let guard = self.camera.lock()?;
            let (ident, counter) = guard.last_frame();
            (ident >= 0 && counter > self.last_counter).then_some((ident, counter))
        };
        let Some((ident, counter)) = found else {
            return Ok(None);
        };
        match FrameHandle::attach(ident) {
            Ok(handle) => {
                self.last_counter = counter;
                Ok(Some(handle))
            }
            Err(_) => {
                self.last_counter = counter;
                Ok(None)
            }
        }
    }

    /// Block until a genuinely new frame is available and attach to it,
    /// retrying the wait if the frame was recycled out from under this
    /// consumer before it could attach.
    pub fn wait_for_frame(&mut self) -> Result<FrameHandle> {
        loop {
            self.wait()?;
            if let Some(arr) = self.attach_latest_frame()? {
                return Ok(arr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorConfig;
    use crate::ring::ProducerRing;
    use tao_clock::Time;
    use tao_geometry::{PixelEncoding, Roi};
    use tao_shm::Perm;

    fn config() -> DescriptorConfig {
        DescriptorConfig {
            depth: 16,
            pixel_encoding: PixelEncoding::Mono16,
            weighted: false,
            sensor_width: 64,
            sensor_height: 64,
            roi: Roi {
                xoff: 0,
                yoff: 0,
                width: 8,
                height: 4,
                xbin: 1,
                ybin: 1,
            },
            bias: 0.0,
            gain: 1.0,
            framerate: 100.0,
            exposure_time: 0.005,
            gamma: 1.0,
        }
    }

    #[test]
    fn rejects_out_of_range_slot() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        let ident = cam.ident();
        let err = Consumer::attach(ident, N_SEM).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSize);
        cam.detach().unwrap();
    }

    #[test]
    fn attach_latest_frame_sees_published_frame() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        let ident = cam.ident();
        let mut ring = ProducerRing::new(3, Perm::default()).unwrap();
        let mut consumer = Consumer::attach(ident, 0).unwrap();

        assert!(consumer.attach_latest_frame().unwrap().is_none());

        let snapshot = cam.lock().unwrap().snapshot();
        let arr = ring.fetch_next(&cam.lock().unwrap(), &snapshot).unwrap();
        {
            let mut guard = cam.lock().unwrap();
            ring.publish_next(&arr, &mut guard, Time { sec: 42, nsec: 0 }, &snapshot).unwrap();
        }
        arr.detach().unwrap();

        let seen = consumer.attach_latest_frame().unwrap().expect("frame published");
        assert_eq!(seen.data().len(), 8 * 4 * 2);
        seen.detach().unwrap();
        assert!(consumer.attach_latest_frame().unwrap().is_none());

        consumer.detach().unwrap();
        cam.detach().unwrap();
    }

    /// A frame still held by a consumer (never detached) must survive the
    /// ring wrapping back around to its slot: `nreaders` stays nonzero, so
    /// `try_recycle` refuses it and the ring falls back to a fresh buffer
    /// instead, rather than tearing the pixels the consumer is reading.
    #[test]
    fn held_frame_is_not_recycled_while_a_reader_attaches_it() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        let ident = cam.ident();
        let mut ring = ProducerRing::new(2, Perm::default()).unwrap();
        let mut consumer = Consumer::attach(ident, 0).unwrap();

        let ts1 = Time { sec: 1, nsec: 0 };
        let snapshot = cam.lock().unwrap().snapshot();
        let arr = ring.fetch_next(&cam.lock().unwrap(), &snapshot).unwrap();
        {
            let mut guard = cam.lock().unwrap();
            ring.publish_next(&arr, &mut guard, ts1, &snapshot).unwrap();
        }
        let first_ident = arr.ident();
        arr.detach().unwrap();

        let held = consumer.attach_latest_frame().unwrap().expect("frame published");
        assert_eq!(held.ident(), first_ident);

        // Two more publishes: the first lands on the other ring slot, the
        // second wraps back to the slot holding `held`'s buffer.
        for i in 0..2 {
            let snapshot = cam.lock().unwrap().snapshot();
            let arr = ring.fetch_next(&cam.lock().unwrap(), &snapshot).unwrap();
            assert_ne!(arr.ident(), first_ident, "held frame must not be handed out for reuse");
            let ts = Time { sec: 2 + i, nsec: 0 };
            {
                let mut guard = cam.lock().unwrap();
                ring.publish_next(&arr, &mut guard, ts, &snapshot).unwrap();
            }
            arr.detach().unwrap();
        }

        {
            let g = held.lock().unwrap();
            assert_eq!(g.counter(), 1);
            assert_eq!(g.timestamp(), ts1);
        }

        held.detach().unwrap();
        consumer.detach().unwrap();
        cam.detach().unwrap();
    }

    /// S3: at most N_SEM consumers waiting on distinct slots, each sees the
    /// same publish as a single zero-to-nonzero semaphore transition.
    #[test]
    fn scenario_s3_timed_wait_reports_timeout_without_publish() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        let ident = cam.ident();
        let consumer = Consumer::attach(ident, 1).unwrap();
        let outcome = consumer.timed_wait(Duration::from_millis(10)).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        consumer.detach().unwrap();
        cam.detach().unwrap();
    }
}

//! The shared camera descriptor: the single shared object holding the
//! current acquisition contract, the identifier of the latest published
//! frame, and a fixed set of notification semaphores.

use tao_clock::Time;
use tao_error::Result;
use tao_geometry::{PixelEncoding, Roi};
use tao_shm::{Perm, Region, Variant};
use tao_sync::RawSemaphore;

/// Number of notification semaphores embedded in every descriptor. Fixed
/// rather than configurable: each consumer cooperatively picks a distinct
/// slot in `[0, N_SEM)`.
pub const N_SEM: usize = 5;

/// `state` transitions: closed -> open-idle on device open, open-idle ->
/// acquiring on start, acquiring -> open-idle on stop/abort.
pub mod state {
    pub const CLOSED: i32 = 0;
    pub const OPEN_IDLE: i32 = 1;
    pub const ACQUIRING: i32 = 2;
}

#[repr(C)]
struct CameraFields {
    sem: [RawSemaphore; N_SEM],
    state: i32,
    depth: i32,
    pixel_type: u32,
    weighted: u8,
    _pad: [u8; 3],
    sensor_width: i64,
    sensor_height: i64,
    xoff: i64,
    yoff: i64,
    width: i64,
    height: i64,
    xbin: i64,
    ybin: i64,
    bias: f64,
    gain: f64,
    framerate: f64,
    exposure_time: f64,
    gamma: f64,
    last_frame_ident: i64,
    last_frame_counter: i64,
}

/// The parameters needed to create a fresh descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorConfig {
    pub depth: i32,
    pub pixel_encoding: PixelEncoding,
    pub weighted: bool,
    pub sensor_width: i64,
    pub sensor_height: i64,
    pub roi: Roi,
    pub bias: f64,
    pub gain: f64,
    pub framerate: f64,
    pub exposure_time: f64,
    pub gamma: f64,
}

/// A point-in-time copy of everything the descriptor publishes, taken
/// under its lock and safe to use after releasing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSnapshot {
    pub state: i32,
    pub depth: i32,
    pub pixel_encoding: PixelEncoding,
    pub weighted: bool,
    pub sensor_width: i64,
    pub sensor_height: i64,
    pub roi: Roi,
    pub bias: f64,
    pub gain: f64,
    pub framerate: f64,
    pub exposure_time: f64,
    pub gamma: f64,
    pub last_frame_ident: i64,
    pub last_frame_counter: i64,
}

impl CameraSnapshot {
    /// The frame shape the ring (4.F) expects: 2-D `(width, height)`, or
    /// 3-D `(width, height, 2)` for a `(value, weight)` pair per pixel when
    /// `weighted` is set.
    #[must_use]
    pub fn frame_dims(&self) -> Vec<i64> {
        if self.weighted {
            vec![self.roi.width, self.roi.height, 2]
        } else {
            vec![self.roi.width, self.roi.height]
        }
    }
}

/// The camera descriptor shared object.
pub struct SharedCamera {
    region: Region,
}

impl SharedCamera {
    fn fields_ptr(&self) -> *mut CameraFields {
        unsafe {
            self.region
                .as_ptr()
                .add(std::mem::size_of::<tao_shm::Header>())
                .cast::<CameraFields>()
        }
    }

    fn fields(&self) -> &CameraFields {
        unsafe { &*self.fields_ptr() }
    }

    pub fn create(config: &DescriptorConfig, perm: Perm) -> Result<SharedCamera> {
        let header_size = std::mem::size_of::<tao_shm::Header>();
        let total = header_size + std::mem::size_of::<CameraFields>();
        let cfg = *config;

        let region = Region::create(Variant::Camera, total, perm, move |ptr, _len| {
            let fields = unsafe { ptr.add(header_size).cast::<CameraFields>() };
            for i in 0..N_SEM {
                unsafe {
                    RawSemaphore::init_at(std::ptr::addr_of_mut!((*fields).sem[i]), 0)?;
                }
            }
            unsafe {
                std::ptr::addr_of_mut!((*fields).state).write(state::CLOSED);
                std::ptr::addr_of_mut!((*fields).depth).write(cfg.depth);
                std::ptr::addr_of_mut!((*fields).pixel_type).write(cfg.pixel_encoding.tag());
                std::ptr::addr_of_mut!((*fields).weighted).write(u8::from(cfg.weighted));
                std::ptr::addr_of_mut!((*fields).sensor_width).write(cfg.sensor_width);
                std::ptr::addr_of_mut!((*fields).sensor_height).write(cfg.sensor_height);
                std::ptr::addr_of_mut!((*fields).xoff).write(cfg.roi.xoff);
                std::ptr::addr_of_mut!((*fields).yoff).write(cfg.roi.yoff);
                std::ptr::addr_of_mut!((*fields).width).write(cfg.roi.width);
                std::ptr::addr_of_mut!((*fields).height).write(cfg.roi.height);
                std::ptr::addr_of_mut!((*fields).xbin).write(cfg.roi.xbin);
                std::ptr::addr_of_mut!((*fields).ybin).write(cfg.roi.ybin);
                std::ptr::addr_of_mut!((*fields).bias).write(cfg.bias);
                std::ptr::addr_of_mut!((*fields).gain).write(cfg.gain);
                std::ptr::addr_of_mut!((*fields).framerate).write(cfg.framerate);
                std::ptr::addr_of_mut!((*fields).exposure_time).write(cfg.exposure_time);
                std::ptr::addr_of_mut!((*fields).gamma).write(cfg.gamma);
                std::ptr::addr_of_mut!((*fields).last_frame_ident).write(-1);
                std::ptr::addr_of_mut!((*fields).last_frame_counter).write(0);
            }
            Ok(())
        })?;
        Ok(SharedCamera { region })
    }

    pub fn attach(ident: i64) -> Result<SharedCamera> {
        let region = Region::attach(ident, Variant::Camera)?;
        Ok(SharedCamera { region })
    }

    /// Release this attachment, destroying the embedded semaphores first
    /// if this was the last reference.
    pub fn detach(self) -> Result<()> {
        let header_size = std::mem::size_of::<tao_shm::Header>();
        self.region.detach_with(|header| {
            let base = (header as *const tao_shm::Header).cast::<u8>();
            let fields = unsafe { &*base.add(header_size).cast::<CameraFields>() };
            for sem in &fields.sem {
                if let Err(err) = unsafe { sem.destroy() } {
                    tracing::warn!(%err, "error destroying descriptor semaphore");
                }
            }
        })
    }

    #[must_use]
    pub fn ident(&self) -> i64 {
        self.region.ident()
    }

    /// Access one of the `N_SEM` notification semaphores. Semaphores are
    /// self-synchronizing and intentionally not guarded by the descriptor
    /// lock: consumers wait on them without holding it.
    #[must_use]
    pub fn semaphore(&self, slot: usize) -> &RawSemaphore {
        assert!(slot < N_SEM, "semaphore slot out of range");
        unsafe { &(*self.fields_ptr()).sem[slot] }
    }

    pub fn lock(&self) -> Result<DescriptorGuard<'_>> {
        let guard = self.region.header().lock.lock()?;
        Ok(DescriptorGuard { _guard: guard, camera: self })
    }
}

/// RAII guard granting access to the descriptor's mutable fields while its
/// lock is held.
pub struct DescriptorGuard<'a> {
    _guard: tao_sync::MutexGuard<'a>,
    camera: &'a SharedCamera,
}

impl<'a> DescriptorGuard<'a> {
    /// The descriptor this guard locks, for operations (like posting a
    /// notification semaphore) that are intentionally not gated by the
    /// lock itself.
    #[must_use]
    pub fn camera(&self) -> &'a SharedCamera {
        self.camera
    }

    #[must_use]
    pub fn state(&self) -> i32 {
        self.camera.fields().state
    }

    pub fn set_state(&mut self, s: i32) {
        unsafe { (*self.camera.fields_ptr()).state = s };
    }

    #[must_use]
    pub fn last_frame(&self) -> (i64, i64) {
        let f = self.camera.fields();
        (f.last_frame_ident, f.last_frame_counter)
    }

    pub fn set_last_frame(&mut self, ident: i64, counter: i64) {
        unsafe {
            let f = &mut *self.camera.fields_ptr();
            f.last_frame_ident = ident;
            f.last_frame_counter = counter;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CameraSnapshot {
        let f = self.camera.fields();
        CameraSnapshot {
            state: f.state,
            depth: f.depth,
            pixel_encoding: PixelEncoding::from_tag(f.pixel_type).unwrap_or(PixelEncoding::Unknown),
            weighted: f.weighted != 0,
            sensor_width: f.sensor_width,
            sensor_height: f.sensor_height,
            roi: Roi {
                xoff: f.xoff,
                yoff: f.yoff,
                width: f.width,
                height: f.height,
                xbin: f.xbin,
                ybin: f.ybin,
            },
            bias: f.bias,
            gain: f.gain,
            framerate: f.framerate,
            exposure_time: f.exposure_time,
            gamma: f.gamma,
            last_frame_ident: f.last_frame_ident,
            last_frame_counter: f.last_frame_counter,
        }
    }

    /// Overwrite every configuration field from a validated snapshot
    /// (`state`/`last_frame` are left untouched — they are updated through
    /// their own setters).
    pub fn apply_config(&mut self, cfg: &DescriptorConfig) {
        unsafe {
            let f = &mut *self.camera.fields_ptr();
            f.depth = cfg.depth;
            f.pixel_type = cfg.pixel_encoding.tag();
            f.weighted = u8::from(cfg.weighted);
            f.sensor_width = cfg.sensor_width;
            f.sensor_height = cfg.sensor_height;
            f.xoff = cfg.roi.xoff;
            f.yoff = cfg.roi.yoff;
            f.width = cfg.roi.width;
            f.height = cfg.roi.height;
            f.xbin = cfg.roi.xbin;
            f.ybin = cfg.roi.ybin;
            f.bias = cfg.bias;
            f.gain = cfg.gain;
            f.framerate = cfg.framerate;
            f.exposure_time = cfg.exposure_time;
            f.gamma = cfg.gamma;
        }
    }
}

/// A capture timestamp pair, used when publishing a frame (see `ring`).
pub type CaptureTime = Time;

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DescriptorConfig {
        DescriptorConfig {
            depth: 16,
            pixel_encoding: PixelEncoding::Mono16,
            weighted: false,
            sensor_width: 1024,
            sensor_height: 1024,
            roi: Roi {
                xoff: 0,
                yoff: 0,
                width: 16,
                height: 8,
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
    fn create_starts_closed_with_no_frame() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        {
            let guard = cam.lock().unwrap();
            assert_eq!(guard.state(), state::CLOSED);
            assert_eq!(guard.last_frame(), (-1, 0));
        }
        cam.detach().unwrap();
    }

    #[test]
    fn semaphore_post_and_wait_roundtrip() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        cam.semaphore(0).post().unwrap();
        assert_eq!(cam.semaphore(0).value().unwrap(), 1);
        cam.semaphore(0).wait().unwrap();
        cam.detach().unwrap();
    }

    #[test]
    fn snapshot_round_trips_configuration() {
        let cam = SharedCamera::create(&config(), Perm::default()).unwrap();
        let snap = cam.lock().unwrap().snapshot();
        assert_eq!(snap.pixel_encoding, PixelEncoding::Mono16);
        assert_eq!(snap.roi.width, 16);
        assert_eq!(snap.framerate, 100.0);
        cam.detach().unwrap();
    }
}

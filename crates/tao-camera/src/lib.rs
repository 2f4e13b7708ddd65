//! Shared camera descriptor, producer frame ring, and consumer API: the
//! pieces that sit directly on top of `tao-shm`/`tao-array` to form one
//! camera's acquisition fabric.

pub mod config;
pub mod consumer;
pub mod descriptor;
pub mod device;
pub mod ring;

#[cfg(feature = "fits")]
pub mod fits;

pub use consumer::{Consumer, FrameHandle};
pub use descriptor::{CameraSnapshot, CaptureTime, DescriptorConfig, DescriptorGuard, SharedCamera, N_SEM};
pub use ring::{decode_raw_into, ProducerRing};

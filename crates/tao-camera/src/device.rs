//! The interface a vendor camera SDK binding implements to drive the
//! producer side of the fabric. No concrete binding lives here: a real
//! device sits behind a vendor's own crate and is out of scope.

use std::time::Duration;

use tao_error::Result;
use tao_geometry::PixelEncoding;

/// A single configurable value on a device, typed the way most vendor
/// feature trees expose them (GenICam-style: boolean, integer, float,
/// enumeration, free string, or a fire-and-forget command).
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(String),
    Str(String),
    Command,
}

/// One enumerated, not-yet-opened device.
pub trait DeviceHandle {
    fn identifier(&self) -> &str;
}

/// The producer-side contract a vendor SDK binding must satisfy.
///
/// Implementations are expected to be thin wrappers over a vendor's own
/// C API; this crate never talks to hardware directly.
pub trait CameraDevice {
    type Handle: DeviceHandle;

    /// List devices currently visible to this SDK.
    fn enumerate() -> Result<Vec<Self::Handle>>
    where
        Self: Sized;

    fn open(handle: &Self::Handle) -> Result<Self>
    where
        Self: Sized;

    fn close(self) -> Result<()>;

    fn get_feature(&self, name: &str) -> Result<Feature>;

    fn set_feature(&mut self, name: &str, value: Feature) -> Result<()>;

    fn pixel_encoding(&self) -> Result<PixelEncoding>;

    fn supported_encodings(&self) -> Result<Vec<PixelEncoding>>;

    /// Submit a buffer the SDK may decode a raw frame into. The buffer's
    /// length must already match `pixel_encoding`'s packed size for the
    /// device's current geometry.
    fn queue_buffer(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Block until a queued buffer has been filled, or the timeout elapses.
    /// Returns `false` on timeout with no buffer delivered.
    fn wait_buffer(&mut self, timeout: Duration) -> Result<bool>;

    /// Discard any buffers the device is holding without waiting for them.
    fn flush(&mut self) -> Result<()>;

    fn start_acquisition(&mut self) -> Result<()>;

    fn stop_acquisition(&mut self) -> Result<()>;
}

/// An in-memory device for exercising the producer loop without hardware.
/// Every queued buffer is "filled" with an incrementing test pattern as
/// soon as it is queued.
#[cfg(feature = "mock")]
pub mod mock {
    use super::{CameraDevice, DeviceHandle, Feature};
    use std::time::Duration;
    use tao_error::Result;
    use tao_geometry::PixelEncoding;

    pub struct MockHandle(pub String);

    impl DeviceHandle for MockHandle {
        fn identifier(&self) -> &str {
            &self.0
        }
    }

    pub struct MockDevice {
        encoding: PixelEncoding,
        pending: Vec<u8>,
        frame_counter: u8,
        acquiring: bool,
    }

    impl MockDevice {
        #[must_use]
        pub fn new(encoding: PixelEncoding) -> MockDevice {
            MockDevice { encoding, pending: Vec::new(), frame_counter: 0, acquiring: false }
        }
    }

    impl CameraDevice for MockDevice {
        type Handle = MockHandle;

        fn enumerate() -> Result<Vec<MockHandle>> {
            Ok(vec![MockHandle("mock0".to_string())])
        }

        fn open(handle: &MockHandle) -> Result<MockDevice> {
            let _ = handle;
            Ok(MockDevice::new(PixelEncoding::Mono8))
        }

        fn close(self) -> Result<()> {
            Ok(())
        }

        fn get_feature(&self, _name: &str) -> Result<Feature> {
            Ok(Feature::Command)
        }

        fn set_feature(&mut self, _name: &str, _value: Feature) -> Result<()> {
            Ok(())
        }

        fn pixel_encoding(&self) -> Result<PixelEncoding> {
            Ok(self.encoding)
        }

        fn supported_encodings(&self) -> Result<Vec<PixelEncoding>> {
            Ok(vec![PixelEncoding::Mono8, PixelEncoding::Mono16])
        }

        fn queue_buffer(&mut self, buf: &mut [u8]) -> Result<()> {
            self.frame_counter = self.frame_counter.wrapping_add(1);
            buf.fill(self.frame_counter);
            self.pending.extend_from_slice(buf);
            Ok(())
        }

        fn wait_buffer(&mut self, _timeout: Duration) -> Result<bool> {
            Ok(!self.pending.is_empty())
        }

        fn flush(&mut self) -> Result<()> {
            self.pending.clear();
            Ok(())
        }

        fn start_acquisition(&mut self) -> Result<()> {
            self.acquiring = true;
            Ok(())
        }

        fn stop_acquisition(&mut self) -> Result<()> {
            self.acquiring = false;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn mock_device_fills_queued_buffers() {
            let mut dev = MockDevice::new(PixelEncoding::Mono8);
            dev.start_acquisition().unwrap();
            let mut buf = vec![0u8; 16];
            dev.queue_buffer(&mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == 1));
            assert!(dev.wait_buffer(Duration::from_millis(0)).unwrap());
            dev.stop_acquisition().unwrap();
        }
    }
}

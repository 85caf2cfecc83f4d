//! Presentation surfaces.
//!
//! Windowing lives outside this crate. A window system integrates by
//! implementing [`PresentationSurface`]; the renderer only needs to acquire an
//! image index and to present it after the GPU signalled a [`BinarySignal`].
//!
//! [`HeadlessSurface`] implements the trait without a window. Presenting
//! consumes the signal with an empty submission, which keeps binary signal
//! bookkeeping identical to a real swapchain.

use std::sync::Arc;

use crate::device::{GraphicsDevice, Submission};
use crate::error::GraphicsError;
use crate::sync::BinarySignal;

/// An image acquired from a presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceImage {
    /// Index of the image in the surface's swap chain.
    pub index: u32,
}

/// Something frames can be presented to.
pub trait PresentationSurface {
    /// Acquire the next image to render into.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::SurfaceOutdated`] when the surface must be
    /// reconfigured.
    fn acquire_next_image(&mut self) -> Result<SurfaceImage, GraphicsError>;

    /// Present `image` once `wait_on` is signalled.
    ///
    /// `wait_on` must be armed; presenting consumes it.
    fn present(&mut self, image: SurfaceImage, wait_on: &BinarySignal)
    -> Result<(), GraphicsError>;
}

/// A surface without a window, for tests and offscreen tools.
pub struct HeadlessSurface {
    device: Arc<GraphicsDevice>,
    image_count: u32,
    next_image: u32,
    outstanding: Vec<u32>,
    presented: u64,
}

impl HeadlessSurface {
    /// Create a surface cycling through `image_count` images.
    ///
    /// # Panics
    ///
    /// Panics if `image_count` is 0.
    pub fn new(device: &Arc<GraphicsDevice>, image_count: u32) -> Self {
        assert!(image_count > 0, "image_count must be at least 1");
        Self {
            device: Arc::clone(device),
            image_count,
            next_image: 0,
            outstanding: Vec::new(),
            presented: 0,
        }
    }

    /// Number of images in the swap chain.
    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Number of presented images.
    pub fn presented_count(&self) -> u64 {
        self.presented
    }
}

impl PresentationSurface for HeadlessSurface {
    fn acquire_next_image(&mut self) -> Result<SurfaceImage, GraphicsError> {
        if self.outstanding.len() as u32 >= self.image_count {
            return Err(GraphicsError::InvalidParameter(format!(
                "all {} surface images are acquired and not presented",
                self.image_count
            )));
        }

        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.outstanding.push(index);
        log::trace!("HeadlessSurface: acquired image {}", index);
        Ok(SurfaceImage { index })
    }

    fn present(&mut self, image: SurfaceImage, wait_on: &BinarySignal) -> Result<(), GraphicsError> {
        let Some(position) = self.outstanding.iter().position(|&i| i == image.index) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "surface image {} was not acquired",
                image.index
            )));
        };

        let list = self
            .device
            .create_command_encoder()
            .with_label("present")
            .complete();
        self.device.submit(Submission::new(list).wait(wait_on))?;

        self.outstanding.remove(position);
        self.presented += 1;
        log::trace!("HeadlessSurface: presented image {}", image.index);
        Ok(())
    }
}

impl std::fmt::Debug for HeadlessSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessSurface")
            .field("image_count", &self.image_count)
            .field("outstanding", &self.outstanding)
            .field("presented", &self.presented)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendType, DeviceDescriptor};

    fn create_test_device() -> Arc<GraphicsDevice> {
        GraphicsDevice::new(&DeviceDescriptor::new().with_backend(BackendType::Dummy)).unwrap()
    }

    #[test]
    fn test_acquire_cycles_images() {
        let device = create_test_device();
        let mut surface = HeadlessSurface::new(&device, 2);
        let signal = device.create_binary_signal(None).unwrap();

        let first = surface.acquire_next_image().unwrap();
        let second = surface.acquire_next_image().unwrap();
        assert_eq!((first.index, second.index), (0, 1));
        assert!(surface.acquire_next_image().is_err());

        let list = device.create_command_encoder().complete();
        device.submit(Submission::new(list).signal(&signal)).unwrap();
        surface.present(first, &signal).unwrap();
        assert!(!signal.is_armed());
        assert_eq!(surface.presented_count(), 1);

        assert_eq!(surface.acquire_next_image().unwrap().index, 0);
    }

    #[test]
    fn test_present_unknown_image_fails() {
        let device = create_test_device();
        let mut surface = HeadlessSurface::new(&device, 2);
        let signal = device.create_binary_signal(None).unwrap();
        assert!(surface.present(SurfaceImage { index: 1 }, &signal).is_err());
    }
}

//! Device and renderer configuration.
//!
//! Descriptors follow the builder style used by the rest of the crate and
//! derive `serde` traits so applications can load them from settings files.

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;

/// Which GPU backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Try Vulkan, fall back to the dummy backend.
    #[default]
    Auto,
    /// Emulated queue executing on a CPU worker thread.
    Dummy,
    /// Native Vulkan through ash.
    Vulkan,
}

impl BackendType {
    /// Get the backend name for display.
    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Dummy => "dummy",
            Self::Vulkan => "vulkan",
        }
    }
}

/// Parameters for creating a [`GraphicsDevice`].
///
/// [`GraphicsDevice`]: crate::GraphicsDevice
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDescriptor {
    /// Debug label for the device.
    pub label: Option<String>,
    /// Backend selection.
    pub backend: BackendType,
    /// Enable API validation where the backend supports it.
    pub validation: bool,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            backend: BackendType::Auto,
            validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceDescriptor {
    /// Create a descriptor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Configuration for a [`Renderer`].
///
/// `frames_in_flight` trades latency for throughput: each extra slot lets the
/// CPU run one more frame ahead of the GPU.
///
/// [`Renderer`]: crate::Renderer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots in the ring.
    pub frames_in_flight: usize,
    /// Size of the transfer pool's backing buffer in bytes.
    pub transfer_pool_capacity: u64,
    /// Debug label of the transfer pool.
    pub transfer_pool_label: String,
    /// Device creation parameters.
    pub device: DeviceDescriptor,
}

impl RendererConfig {
    /// Default transfer pool size (4 MiB).
    pub const DEFAULT_TRANSFER_POOL_CAPACITY: u64 = 4 << 20;

    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    /// Set the transfer pool capacity.
    pub fn with_transfer_pool_capacity(mut self, capacity: u64) -> Self {
        self.transfer_pool_capacity = capacity;
        self
    }

    /// Set the transfer pool label.
    pub fn with_transfer_pool_label(mut self, label: impl Into<String>) -> Self {
        self.transfer_pool_label = label.into();
        self
    }

    /// Set the device parameters.
    pub fn with_device(mut self, device: DeviceDescriptor) -> Self {
        self.device = device;
        self
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.transfer_pool_capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "transfer pool capacity cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            transfer_pool_capacity: Self::DEFAULT_TRANSFER_POOL_CAPACITY,
            transfer_pool_label: "transfer_pool".to_string(),
            device: DeviceDescriptor::default(),
        }
    }
}

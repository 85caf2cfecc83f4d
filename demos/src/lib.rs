//! # Tempo Demos
//!
//! Command-line programs driving the Tempo submission core end to end.
//!
//! ## Available Demos
//!
//! - `transfer_stress` - streams small uploads through a tiny transfer pool
//!   and verifies every element after readback
//! - `frame_loop` - runs the renderer on a headless surface, with per-frame
//!   uploads and deferred destruction
//!
//! Both accept `--config <file.toml>` holding a [`RendererConfig`]; command
//! line flags override values from the file.

use std::path::Path;

use tempo_graphics::{BackendType, RendererConfig};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Graphics backend selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliBackend {
    /// Try native Vulkan, fall back to the dummy backend.
    #[default]
    Auto,
    /// Native Vulkan backend via ash.
    Vulkan,
    /// Emulated queue on a CPU thread, for CI environments.
    Dummy,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Auto => BackendType::Auto,
            CliBackend::Vulkan => BackendType::Vulkan,
            CliBackend::Dummy => BackendType::Dummy,
        }
    }
}

/// Flags shared by every demo.
#[derive(Debug, Clone, clap::Args)]
pub struct CommonArgs {
    /// TOML file with renderer settings.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Graphics backend to use.
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,

    /// Number of frames in flight.
    #[arg(long)]
    pub frames_in_flight: Option<usize>,

    /// Transfer pool capacity in bytes.
    #[arg(long)]
    pub pool_capacity: Option<u64>,

    /// Disable API validation layers.
    #[arg(long)]
    pub no_validation: bool,
}

impl CommonArgs {
    /// Build the renderer configuration: defaults, then the file, then flags.
    pub fn renderer_config(
        &self,
        defaults: RendererConfig,
    ) -> Result<RendererConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => defaults,
        };

        if let Some(backend) = self.backend {
            config.device.backend = backend.into();
        }
        if let Some(frames_in_flight) = self.frames_in_flight {
            config.frames_in_flight = frames_in_flight;
        }
        if let Some(capacity) = self.pool_capacity {
            config.transfer_pool_capacity = capacity;
        }
        if self.no_validation {
            config.device.validation = false;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Load a [`RendererConfig`] from a TOML file.
///
/// Missing keys keep their defaults.
pub fn load_config(path: &Path) -> Result<RendererConfig, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let config = toml::from_str(&content)
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;
    log::info!("Loaded renderer settings from {}", path.display());
    Ok(config)
}

/// Initialize logging with `info` as the default level.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

//! Command-line configuration for both tools

use clap::Parser;
use tracing::warn;

use crate::server::{SampleSpec, DEFAULT_SOURCE};
use crate::session::SessionError;

/// Capture rate requested from the server
pub const SAMPLE_RATE: u32 = 4096;
/// Stereo input; the button shows up on the otherwise unused channel
pub const CHANNELS: u8 = 2;
/// Samples (all channels) per block average
pub const BLOCK_SIZE: usize = 64;
/// Sensitivity as a percentage of full scale
pub const THRESHOLD_PERCENT: u8 = 95;
/// Minimum width in blocks of a pulse that counts as a button edge
pub const PEAK_BLOCK_COUNT: u32 = 5;
/// Name of the virtual source that gets muted
pub const REMAPPED_DEVICE_NAME: &str = "mictoggle_remapped";

/// Mute a virtual microphone from a headset button
///
/// Device names can be found with `pactl list sources`, and look
/// something like "alsa_input.pci-0000_00_1f.3.analog-stereo".
#[derive(Debug, Clone, Parser)]
#[command(name = "mictoggle", version)]
pub struct ToggleArgs {
    /// Capture source the headset button is wired to
    pub device_name: Option<String>,

    /// Name of the virtual source to create and mute
    #[arg(long = "virtual-name", default_value = REMAPPED_DEVICE_NAME)]
    pub virtual_name: String,

    /// Sensitivity as a percentage of full scale
    #[arg(long = "threshold-percent", default_value_t = THRESHOLD_PERCENT,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    pub threshold_percent: u8,

    /// Minimum pulse width, in blocks, that counts as a button edge
    #[arg(long = "required-blocks", default_value_t = PEAK_BLOCK_COUNT,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub required_blocks: u32,

    /// Samples per block average
    #[arg(long = "block-size", default_value_t = BLOCK_SIZE,
          value_parser = parse_block_size)]
    pub block_size: usize,

    /// Capture rate in Hz
    #[arg(long = "rate", default_value_t = SAMPLE_RATE,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: u32,

    /// Do not show desktop notifications
    #[arg(long = "no-notify", default_value_t = false)]
    pub no_notify: bool,
}

/// Print raw levels and button edges from a capture source
#[derive(Debug, Clone, Parser)]
#[command(name = "mictoggle-capture", version)]
pub struct CaptureArgs {
    /// Capture source; the server default if omitted
    pub device: Option<String>,

    /// Capture rate in Hz
    #[arg(default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_rate: u32,

    /// Frames per level reading
    #[arg(default_value_t = 128, value_parser = parse_block_size)]
    pub buffer_frames: usize,

    /// Sensitivity as a percentage of full scale
    #[arg(default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub threshold_percent: u8,

    /// Minimum pulse width, in readings, that counts as a button edge
    #[arg(default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub required_frames: u32,

    /// Print one JSON object per line
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

fn parse_block_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Settings for one toggle session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Raw capture source
    pub device_name: String,
    /// Virtual source that is muted and unmuted
    pub virtual_source_name: String,
    pub spec: SampleSpec,
    pub block_size: usize,
    pub threshold_percent: u8,
    pub required_blocks: u32,
    pub notifications: bool,
}

impl Config {
    /// Build the toggle tool's configuration; a device name is required
    pub fn from_toggle_args(args: ToggleArgs) -> Result<Self, SessionError> {
        let device_name = args.device_name.ok_or(SessionError::Configuration)?;

        Ok(Self {
            device_name,
            virtual_source_name: args.virtual_name,
            spec: SampleSpec {
                rate: args.sample_rate,
                channels: CHANNELS,
            },
            block_size: args.block_size,
            threshold_percent: args.threshold_percent,
            required_blocks: args.required_blocks,
            notifications: !args.no_notify,
        })
    }
}

/// Settings for the diagnostic capture tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub device_name: String,
    pub spec: SampleSpec,
    /// Samples (all channels) per level reading
    pub block_size: usize,
    pub threshold_percent: u8,
    pub required_blocks: u32,
    pub json: bool,
}

impl CaptureConfig {
    /// Build the capture tool's configuration, falling back to the default source
    pub fn from_args(args: CaptureArgs) -> Self {
        let device_name = args.device.unwrap_or_else(|| {
            warn!("no device given, using {DEFAULT_SOURCE}");
            DEFAULT_SOURCE.to_string()
        });

        Self {
            device_name,
            spec: SampleSpec {
                rate: args.sample_rate,
                channels: CHANNELS,
            },
            block_size: args.buffer_frames * usize::from(CHANNELS),
            threshold_percent: args.threshold_percent,
            required_blocks: args.required_frames,
            json: args.json,
        }
    }
}

//! Audio subsystem module

pub mod buffer;
#[cfg(feature = "output")]
pub mod device;
pub mod mixer;
#[cfg(feature = "output")]
pub mod output;

pub use buffer::{AudioBuffer, SharedBuffer};
#[cfg(feature = "output")]
pub use device::{list_output_devices, OutputDeviceInfo};
pub use mixer::{ChannelStrip, Completion, Mixer};
#[cfg(feature = "output")]
pub use output::AudioOutput;

//! Audio decode/encode and stem mixing

pub mod codec;
pub mod mixer;

pub use codec::{PcmBuffer, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
pub use mixer::{MixSummary, StemMixer, MISSING_STEM_SILENCE};

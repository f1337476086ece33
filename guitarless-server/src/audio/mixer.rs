//! Stem mixer
//!
//! Builds the two published mixes from the separation output:
//! - isolated mix: the instrument stem alone
//! - remainder mix: sample-wise sum of the three other stems
//!
//! A stem whose file is missing is replaced by a short silence, so a
//! partial separation still yields two playable files.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::codec::{self, PcmBuffer, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
use crate::error::PipelineError;
use crate::models::StemSet;

/// Stand-in duration for a missing stem
pub const MISSING_STEM_SILENCE: Duration = Duration::from_secs(1);

/// Frame counts of the written mixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixSummary {
    pub isolated_frames: usize,
    pub remainder_frames: usize,
}

/// Stem mixer with a fixed output format
#[derive(Debug, Clone)]
pub struct StemMixer {
    sample_rate: u32,
    channels: usize,
    missing_stem_silence: Duration,
}

impl Default for StemMixer {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: TARGET_CHANNELS,
            missing_stem_silence: MISSING_STEM_SILENCE,
        }
    }
}

impl StemMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine decoded stems into `(isolated, remainder)`
    ///
    /// Pure: the isolated mix is the instrument buffer unchanged; the
    /// remainder is the additive overlay of `others`, as long as the longest
    /// of them, accumulated in f64 and clamped so the result does not
    /// depend on overlay order.
    pub fn mix_buffers(&self, instrument: PcmBuffer, others: [PcmBuffer; 3]) -> (PcmBuffer, PcmBuffer) {
        let len = others.iter().map(|b| b.samples.len()).max().unwrap_or(0);
        let mut acc = vec![0.0f64; len];
        for stem in &others {
            for (slot, sample) in acc.iter_mut().zip(&stem.samples) {
                *slot += *sample as f64;
            }
        }

        let remainder = PcmBuffer {
            samples: acc.into_iter().map(|s| s.clamp(-1.0, 1.0) as f32).collect(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        };
        (instrument, remainder)
    }

    /// Load one stem at the normalized format, or silence if it is missing
    pub fn load_stem(&self, path: &Path) -> Result<PcmBuffer, PipelineError> {
        if !path.exists() {
            warn!(stem = %path.display(), "Stem missing, substituting silence");
            return Ok(PcmBuffer::silence(
                self.missing_stem_silence,
                self.sample_rate,
                self.channels,
            ));
        }

        codec::decode_normalized(path, self.sample_rate)
            .map_err(|e| PipelineError::Mix(format!("{:#}", e)))
    }

    /// Decode the stems, mix them, and encode both outputs
    ///
    /// Blocking; run it on the blocking pool.
    pub fn mix_files(
        &self,
        stems: &StemSet,
        isolated_out: &Path,
        remainder_out: &Path,
    ) -> Result<MixSummary, PipelineError> {
        let instrument = self.load_stem(&stems.instrument)?;
        let others = [
            self.load_stem(&stems.others[0])?,
            self.load_stem(&stems.others[1])?,
            self.load_stem(&stems.others[2])?,
        ];

        let (isolated, remainder) = self.mix_buffers(instrument, others);

        codec::encode_flac(&isolated, isolated_out)
            .map_err(|e| PipelineError::Mix(format!("{:#}", e)))?;
        codec::encode_flac(&remainder, remainder_out)
            .map_err(|e| PipelineError::Mix(format!("{:#}", e)))?;

        let summary = MixSummary {
            isolated_frames: isolated.frames(),
            remainder_frames: remainder.frames(),
        };
        debug!(?summary, "Stems mixed");
        Ok(summary)
    }
}

//! Audio codec boundary
//!
//! Decodes any container symphonia understands into normalized interleaved
//! f32 PCM (44.1 kHz stereo), and encodes PCM to 16-bit FLAC for delivery.
//! Resampling uses rubato sinc interpolation.

use anyhow::{anyhow, Context, Result};
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Normalized output sample rate
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Normalized output channel count
pub const TARGET_CHANNELS: usize = 2;

/// Bit depth of encoded output
const OUTPUT_BITS_PER_SAMPLE: usize = 16;

/// Interleaved PCM buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples (f32, normalized -1.0 to 1.0)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: usize,
}

impl PcmBuffer {
    /// Silent buffer of the given duration
    pub fn silence(duration: Duration, sample_rate: u32, channels: usize) -> Self {
        let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        Self {
            samples: vec![0.0; frames * channels],
            sample_rate,
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Unsupported audio format: {}", path.display()))?;

    Ok(probed.format)
}

/// Duration reported by the container, if it declares one
pub fn probe_duration(path: &Path) -> Result<Option<Duration>> {
    let format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found in file")?;

    let duration = match (track.codec_params.n_frames, track.codec_params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
        _ => None,
    };
    Ok(duration)
}

/// Decode a file to interleaved stereo PCM at `target_sample_rate`
///
/// Mono sources are duplicated to both channels; sources with more than
/// two channels keep their first two.
pub fn decode_normalized(path: &Path, target_sample_rate: u32) -> Result<PcmBuffer> {
    debug!(path = %path.display(), "Decoding audio file");

    let mut format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found in file")?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let native_sample_rate = codec_params
        .sample_rate
        .context("Sample rate not specified in codec params")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .with_context(|| format!("Failed to create decoder for: {}", path.display()))?;

    let mut stereo: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e).context("Failed to read packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frame: skip it and keep going
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(e).context("Failed to decode packet"),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        for frame in sample_buf.samples().chunks_exact(channels) {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { frame[0] };
            stereo.push(left);
            stereo.push(right);
        }
    }

    debug!(
        path = %path.display(),
        frames = stereo.len() / TARGET_CHANNELS,
        native_sample_rate,
        "Audio decoding complete"
    );

    let samples = if native_sample_rate != target_sample_rate {
        resample_stereo(stereo, native_sample_rate, target_sample_rate)
            .context("Failed to resample audio")?
    } else {
        stereo
    };

    Ok(PcmBuffer {
        samples,
        sample_rate: target_sample_rate,
        channels: TARGET_CHANNELS,
    })
}

/// Resample interleaved stereo PCM
///
/// Sinc interpolation, 256 taps, BlackmanHarris2 window, single pass over
/// the whole input.
fn resample_stereo(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(samples);
    }

    let num_frames = samples.len() / 2;
    let mut left = Vec::with_capacity(num_frames);
    let mut right = Vec::with_capacity(num_frames);
    for frame in samples.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / source_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, num_frames, 2)
        .context("Failed to create rubato resampler")?;

    let input_channels = vec![left, right];
    let output_channels = resampler
        .process(&input_channels, None)
        .context("Rubato resampling failed")?;

    let output_frames = output_channels[0].len();
    let mut output = Vec::with_capacity(output_frames * 2);
    for i in 0..output_frames {
        output.push(output_channels[0][i]);
        output.push(output_channels[1][i]);
    }

    debug!(
        "Resampled {} frames ({} Hz) → {} frames ({} Hz)",
        num_frames, source_rate, output_frames, target_rate
    );

    Ok(output)
}

/// Encode a buffer as 16-bit FLAC and write it to `path`
pub fn encode_flac(buffer: &PcmBuffer, path: &Path) -> Result<()> {
    let scale = ((1i32 << (OUTPUT_BITS_PER_SAMPLE - 1)) - 1) as f32;
    let samples: Vec<i32> = buffer
        .samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * scale).round() as i32)
        .collect();

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|(_, e)| anyhow!("Invalid FLAC encoder config: {:?}", e))?;
    let source = flacenc::source::MemSource::from_samples(
        &samples,
        buffer.channels,
        OUTPUT_BITS_PER_SAMPLE,
        buffer.sample_rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| anyhow!("FLAC encoding failed: {:?}", e))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| anyhow!("FLAC serialization failed: {:?}", e))?;

    std::fs::write(path, sink.as_slice())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!(
        path = %path.display(),
        frames = buffer.frames(),
        bytes = sink.as_slice().len(),
        "Encoded FLAC"
    );
    Ok(())
}

pub const TARGET_SAMPLE_RATE_HZ: u32 = 16_000;
pub const CHANNELS: u16 = 1;
pub const DEFAULT_BLOCK_LEN: usize = 4096;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::sync::mpsc::SyncSender;

use crate::error::{SessionError, SessionResult};

/// One fixed-size chunk of raw audio from the capture callback, together with
/// the rate it was captured at. Samples are normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub source_rate_hz: u32,
}

impl AudioBlock {
    pub fn new(samples: Vec<f32>, source_rate_hz: u32) -> Self {
        Self {
            samples,
            source_rate_hz,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub fn validate_stream_format(sample_rate_hz: u32, channels: u16) -> Result<(), String> {
    if sample_rate_hz != TARGET_SAMPLE_RATE_HZ {
        return Err(format!(
            "invalid sample rate: expected {TARGET_SAMPLE_RATE_HZ}, got {sample_rate_hz}"
        ));
    }
    if channels != CHANNELS {
        return Err(format!(
            "invalid channel count: expected {CHANNELS}, got {channels}"
        ));
    }
    Ok(())
}

/// Linear-interpolation resampling of one block to `target_rate_hz`.
///
/// Output length is `round(len * target / source)`. The first and last input
/// samples are preserved; interior points interpolate between neighbors. Not
/// band-limited, so aliasing is possible above the target Nyquist; each block
/// resamples independently of its predecessors.
pub fn resample_block(block: &AudioBlock, target_rate_hz: u32) -> SessionResult<Vec<f32>> {
    let input = &block.samples;
    if block.source_rate_hz == 0 || target_rate_hz == 0 {
        return Err(SessionError::invalid_block_size(format!(
            "invalid rate pair {} -> {}",
            block.source_rate_hz, target_rate_hz
        )));
    }

    let target_len = (input.len() as f64 * f64::from(target_rate_hz)
        / f64::from(block.source_rate_hz))
    .round() as usize;

    if input.len() < 2 || target_len < 2 {
        return Err(SessionError::invalid_block_size(format!(
            "block of {} samples resamples to {} at {} -> {} Hz",
            input.len(),
            target_len,
            block.source_rate_hz,
            target_rate_hz
        )));
    }

    let mut output = vec![0.0_f32; target_len];
    output[0] = input[0];
    output[target_len - 1] = input[input.len() - 1];

    let spring_factor = (input.len() - 1) as f64 / (target_len - 1) as f64;
    for (index, slot) in output
        .iter_mut()
        .enumerate()
        .take(target_len - 1)
        .skip(1)
    {
        let position = index as f64 * spring_factor;
        let left = position.floor() as usize;
        let right = (position.ceil() as usize).min(input.len() - 1);
        let fraction = (position - position.floor()) as f32;
        *slot = input[left] + (input[right] - input[left]) * fraction;
    }

    Ok(output)
}

/// Normalized floats to signed 16-bit PCM. Negative samples scale by 32768 and
/// non-negative by 32767 so both endpoints of the clamp range are reachable.
pub fn encode_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32_768.0) as i16
            } else {
                (clamped * 32_767.0) as i16
            }
        })
        .collect()
}

/// Packs PCM16 samples into the little-endian payload of one wire frame.
pub fn frame_bytes(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

/// Accumulates incoming mono samples and emits exactly `block_len`-sized
/// blocks, carrying any remainder over to the next push.
#[derive(Debug)]
pub struct BlockAssembler {
    block_len: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    pub fn new(block_len: usize) -> Self {
        Self {
            block_len: block_len.max(1),
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_len {
            let block = self.pending.drain(..self.block_len).collect::<Vec<_>>();
            blocks.push(block);
        }
        blocks
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub struct LiveInputStream {
    pub stream: Stream,
    pub sample_rate_hz: u32,
}

/// Opens the capture source and feeds fixed-size mono blocks into `block_tx`
/// at the device's native rate. A full channel drops the block instead of
/// queueing it; the consumer is already behind at that point.
pub fn build_live_input_stream(
    device_id: Option<&str>,
    block_len: usize,
    block_tx: SyncSender<Vec<f32>>,
) -> SessionResult<LiveInputStream> {
    let host = cpal::default_host();
    let device = resolve_input_device(&host, device_id)?;
    let supported = device.default_input_config().map_err(|error| {
        SessionError::capture_unavailable(format!("failed to get default input config: {error}"))
    })?;

    let sample_format = supported.sample_format();
    let stream_config = supported.config();
    let sample_rate_hz = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    let error_callback = move |error| {
        log::error!("live input stream error: {error}");
    };

    let mut assembler = BlockAssembler::new(block_len);
    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let mono = interleaved_f32_to_mono(data, channels);
                    for block in assembler.push(&mono) {
                        let _ = block_tx.try_send(block);
                    }
                },
                error_callback,
                None,
            )
            .map_err(|error| {
                SessionError::capture_unavailable(format!(
                    "failed to build f32 input stream: {error}"
                ))
            })?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let mono = interleaved_i16_to_mono(data, channels);
                    for block in assembler.push(&mono) {
                        let _ = block_tx.try_send(block);
                    }
                },
                error_callback,
                None,
            )
            .map_err(|error| {
                SessionError::capture_unavailable(format!(
                    "failed to build i16 input stream: {error}"
                ))
            })?,
        SampleFormat::U16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u16], _| {
                    let mono = interleaved_u16_to_mono(data, channels);
                    for block in assembler.push(&mono) {
                        let _ = block_tx.try_send(block);
                    }
                },
                error_callback,
                None,
            )
            .map_err(|error| {
                SessionError::capture_unavailable(format!(
                    "failed to build u16 input stream: {error}"
                ))
            })?,
        _ => {
            return Err(SessionError::capture_unavailable(format!(
                "unsupported input sample format: {sample_format:?}"
            )));
        }
    };

    stream.play().map_err(|error| {
        SessionError::capture_unavailable(format!("failed to start input stream: {error}"))
    })?;

    Ok(LiveInputStream {
        stream,
        sample_rate_hz,
    })
}

fn resolve_input_device(host: &cpal::Host, device_id: Option<&str>) -> SessionResult<cpal::Device> {
    if let Some(raw_id) = device_id {
        let trimmed = raw_id.trim();
        if !trimmed.is_empty() {
            let index = trimmed.parse::<usize>().map_err(|_| {
                SessionError::capture_unavailable(format!("invalid input device id: {trimmed}"))
            })?;
            let devices = host
                .input_devices()
                .map_err(|error| {
                    SessionError::capture_unavailable(format!(
                        "failed to enumerate input devices: {error}"
                    ))
                })?
                .collect::<Vec<_>>();
            if let Some(device) = devices.into_iter().nth(index) {
                return Ok(device);
            }
            return Err(SessionError::capture_unavailable(format!(
                "input device not found for id {trimmed}"
            )));
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    host.input_devices()
        .map_err(|error| {
            SessionError::capture_unavailable(format!(
                "failed to enumerate input devices: {error}"
            ))
        })?
        .next()
        .ok_or_else(|| SessionError::capture_unavailable("no audio input is available"))
}

fn interleaved_f32_to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return input.to_vec();
    }

    let mut output = Vec::with_capacity(input.len() / channels);
    for frame in input.chunks_exact(channels) {
        let sum = frame.iter().copied().sum::<f32>();
        output.push(sum / channels as f32);
    }
    output
}

fn interleaved_i16_to_mono(input: &[i16], channels: usize) -> Vec<f32> {
    let scale = f32::from(i16::MAX);
    if channels <= 1 {
        return input
            .iter()
            .map(|sample| f32::from(*sample) / scale)
            .collect();
    }

    let mut output = Vec::with_capacity(input.len() / channels);
    for frame in input.chunks_exact(channels) {
        let mut sum = 0f32;
        for sample in frame {
            sum += f32::from(*sample) / scale;
        }
        output.push(sum / channels as f32);
    }
    output
}

fn interleaved_u16_to_mono(input: &[u16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return input
            .iter()
            .map(|sample| (f32::from(*sample) / f32::from(u16::MAX)) * 2.0 - 1.0)
            .collect();
    }

    let mut output = Vec::with_capacity(input.len() / channels);
    for frame in input.chunks_exact(channels) {
        let mut sum = 0f32;
        for sample in frame {
            sum += (f32::from(*sample) / f32::from(u16::MAX)) * 2.0 - 1.0;
        }
        output.push(sum / channels as f32);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionErrorKind;

    #[test]
    fn validates_target_stream_format() {
        assert!(validate_stream_format(16_000, 1).is_ok());
        assert!(validate_stream_format(48_000, 1).is_err());
        assert!(validate_stream_format(16_000, 2).is_err());
    }

    #[test]
    fn resample_length_matches_rate_ratio() {
        let block = AudioBlock::new(vec![0.0; 4096], 44_100);
        let output = resample_block(&block, 16_000).expect("block should resample");
        assert_eq!(output.len(), 1486);
    }

    #[test]
    fn resample_preserves_boundary_samples() {
        let samples = (0..441)
            .map(|index| index as f32 / 441.0)
            .collect::<Vec<_>>();
        let block = AudioBlock::new(samples.clone(), 44_100);
        let output = resample_block(&block, 16_000).expect("block should resample");
        assert_eq!(output.len(), 160);
        assert_eq!(output[0], samples[0]);
        assert_eq!(output[output.len() - 1], samples[samples.len() - 1]);
    }

    #[test]
    fn resample_interpolates_interior_points() {
        let block = AudioBlock::new(vec![0.0, 2.0, 0.0], 48_000);
        let output = resample_block(&block, 32_000).expect("block should resample");
        // target_len = 2 at half rate; a 3-sample hill keeps its endpoints.
        assert_eq!(output, vec![0.0, 0.0]);

        let ramp = AudioBlock::new(vec![0.0, 1.0, 2.0, 3.0, 4.0], 32_000);
        let halved = resample_block(&ramp, 16_000).expect("ramp should resample");
        assert_eq!(halved.len(), 3);
        assert_eq!(halved[0], 0.0);
        assert_eq!(halved[1], 2.0);
        assert_eq!(halved[2], 4.0);
    }

    #[test]
    fn resample_identity_at_equal_rates() {
        let samples = vec![0.25, -0.5, 0.75, -1.0];
        let block = AudioBlock::new(samples.clone(), 16_000);
        let output = resample_block(&block, 16_000).expect("block should resample");
        assert_eq!(output, samples);
    }

    #[test]
    fn degenerate_target_length_is_invalid_block_size() {
        let block = AudioBlock::new(vec![0.1; 4], 44_100);
        let error = resample_block(&block, 16_000).expect_err("degenerate block should fail");
        assert_eq!(error.kind(), SessionErrorKind::InvalidBlockSize);

        let single = AudioBlock::new(vec![0.1], 16_000);
        assert!(resample_block(&single, 16_000).is_err());
    }

    #[test]
    fn encode_uses_asymmetric_scaling() {
        let encoded = encode_pcm16(&[-1.0, 0.0, 1.0]);
        assert_eq!(encoded, vec![-32_768, 0, 32_767]);
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let encoded = encode_pcm16(&[-2.5, 1.5]);
        assert_eq!(encoded, vec![-32_768, 32_767]);
        assert_eq!(encode_pcm16(&[-1.0, 1.0]), encoded);
    }

    #[test]
    fn frame_bytes_are_little_endian() {
        let bytes = frame_bytes(&[0x0102, -2]);
        assert_eq!(bytes, vec![0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn resampled_block_encodes_to_full_frame() {
        let block = AudioBlock::new(vec![0.5; 4096], 44_100);
        let resampled = resample_block(&block, 16_000).expect("block should resample");
        let encoded = encode_pcm16(&resampled);
        assert_eq!(encoded.len(), 1486);
        assert_eq!(frame_bytes(&encoded).len(), 1486 * 2);
    }

    #[test]
    fn assembler_emits_fixed_size_blocks() {
        let mut assembler = BlockAssembler::new(4);
        assert!(assembler.push(&[0.1, 0.2]).is_empty());
        let blocks = assembler.push(&[0.3, 0.4, 0.5]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn assembler_carries_remainder_across_pushes() {
        let mut assembler = BlockAssembler::new(3);
        let blocks = assembler.push(&[1.0; 8]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(assembler.pending_len(), 2);
        let more = assembler.push(&[1.0; 1]);
        assert_eq!(more.len(), 1);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn averages_interleaved_f32_channels_to_mono() {
        let stereo = vec![0.2_f32, 0.6_f32, -0.2_f32, 0.2_f32];
        let mono = interleaved_f32_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.4_f32, 0.0_f32]);
    }

    #[test]
    fn converts_interleaved_i16_to_float_range() {
        let mono = interleaved_i16_to_mono(&[i16::MIN, 0, i16::MAX], 1);
        assert_eq!(mono.len(), 3);
        assert!(mono[0] < -0.99);
        assert_eq!(mono[1], 0.0);
        assert!(mono[2] > 0.99);
    }
}

use serde::Serialize;
use std::collections::VecDeque;

use crate::audio::{encode_pcm16, frame_bytes, resample_block, AudioBlock};
use crate::transport::TransportHandle;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Destination for encoded frames. The pipeline only sees accept/drop, which
/// keeps it testable without a live socket behind it.
pub trait FrameSink {
    fn offer_frame(&self, frame: Vec<u8>) -> bool;
}

impl FrameSink for TransportHandle {
    fn offer_frame(&self, frame: Vec<u8>) -> bool {
        self.send_frame(frame)
    }
}

/// Bounded ring of recent raw blocks. When full, pushing evicts the oldest
/// block; long sessions hold the tail of the capture, not all of it.
#[derive(Debug)]
pub struct BlockCache {
    blocks: VecDeque<AudioBlock>,
    capacity: usize,
    evicted: u64,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn push(&mut self, block: AudioBlock) {
        if self.blocks.len() == self.capacity {
            self.blocks.pop_front();
            self.evicted += 1;
        }
        self.blocks.push_back(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn source_rate_hz(&self) -> Option<u32> {
        self.blocks.front().map(|block| block.source_rate_hz)
    }

    /// Concatenated samples of the cached blocks, oldest first.
    pub fn samples(&self) -> Vec<f32> {
        let total = self.blocks.iter().map(AudioBlock::len).sum();
        let mut samples = Vec::with_capacity(total);
        for block in &self.blocks {
            samples.extend_from_slice(&block.samples);
        }
        samples
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub processed_blocks: u64,
    pub sent_frames: u64,
    pub dropped_frames: u64,
    pub skipped_blocks: u64,
    pub cached_blocks: usize,
    pub evicted_blocks: u64,
}

/// Per-block work between the capture callback and the transport: retain the
/// raw block, resample to the target rate, encode, and offer the frame to the
/// sink. A sink refusal is silent by design; the frame is stale by the time
/// the channel would next be writable.
#[derive(Debug)]
pub struct CapturePipeline {
    cache: BlockCache,
    target_rate_hz: u32,
    processed_blocks: u64,
    sent_frames: u64,
    dropped_frames: u64,
    skipped_blocks: u64,
}

impl CapturePipeline {
    pub fn new(target_rate_hz: u32, cache_capacity: usize) -> Self {
        Self {
            cache: BlockCache::new(cache_capacity),
            target_rate_hz,
            processed_blocks: 0,
            sent_frames: 0,
            dropped_frames: 0,
            skipped_blocks: 0,
        }
    }

    /// Runs one block through the pipeline. Returns true when its frame was
    /// accepted by the sink.
    pub fn process_block<S: FrameSink>(&mut self, block: AudioBlock, sink: &S) -> bool {
        self.processed_blocks += 1;

        let resampled = match resample_block(&block, self.target_rate_hz) {
            Ok(samples) => samples,
            Err(error) => {
                log::warn!("skipping block: {error}");
                self.skipped_blocks += 1;
                self.cache.push(block);
                return false;
            }
        };
        self.cache.push(block);

        let frame = frame_bytes(&encode_pcm16(&resampled));
        if sink.offer_frame(frame) {
            self.sent_frames += 1;
            true
        } else {
            self.dropped_frames += 1;
            false
        }
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            processed_blocks: self.processed_blocks,
            sent_frames: self.sent_frames,
            dropped_frames: self.dropped_frames,
            skipped_blocks: self.skipped_blocks,
            cached_blocks: self.cache.len(),
            evicted_blocks: self.cache.evicted_count(),
        }
    }
}

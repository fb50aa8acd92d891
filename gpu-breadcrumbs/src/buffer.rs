//! Marker storage for one command stream.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};

use gpu_crash_common::ops::{operation_name, OperationTag};
use tracing::trace;

use crate::marker::{Marker, MarkerStatus};
use crate::recorder::{CommandDevice, GpuAddress, MarkerMemory, RecorderError};

/// Marker buffer dimensions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BreadcrumbConfig {
    /// How many submissions of history to keep.
    pub generations: usize,
    /// Markers per generation. Commands past this are not tracked.
    pub capacity: usize,
}

impl Default for BreadcrumbConfig {
    fn default() -> Self {
        BreadcrumbConfig {
            generations: 4,
            capacity: 65535,
        }
    }
}

impl BreadcrumbConfig {
    pub fn with_generations(mut self, generations: usize) -> Self {
        self.generations = generations.max(1);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// The number of marker words needed, or an error if the dimensions
    /// can't describe a ring.
    fn words(&self) -> Result<usize, RecorderError> {
        if self.generations == 0 {
            return Err(RecorderError::InvalidConfig("at least one generation is required"));
        }
        self.generations
            .checked_mul(self.capacity)
            .filter(|words| words.checked_mul(4).is_some())
            .ok_or(RecorderError::InvalidConfig("marker buffer size overflows"))
    }
}

const UNFINISHED: usize = usize::MAX;

#[derive(Debug)]
struct Generation {
    /// Slots reached by recording so far.
    reached: AtomicUsize,
    /// Slots recorded when the generation was closed, or `UNFINISHED`.
    high_water: AtomicUsize,
    submission: AtomicU64,
    used: AtomicBool,
    overflowed: AtomicBool,
}

impl Generation {
    fn new() -> Generation {
        Generation {
            reached: AtomicUsize::new(0),
            high_water: AtomicUsize::new(UNFINISHED),
            submission: AtomicU64::new(0),
            used: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
        }
    }
}

/// One slot of a generation's history.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SlotEntry {
    pub index: usize,
    /// The operation tag recorded on the CPU for this slot.
    pub tag: u32,
    /// The marker read back from GPU memory.
    pub marker: Marker,
}

impl SlotEntry {
    /// The name decoded from the marker, or from the recorded tag if the GPU
    /// never reached the slot.
    pub fn name(&self) -> &'static str {
        if self.marker.is_empty() {
            operation_name(self.tag)
        } else {
            self.marker.name()
        }
    }

    pub fn status(&self) -> MarkerStatus {
        self.marker.status()
    }
}

/// The history of one generation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GenerationHistory {
    /// How many submissions ago this generation was recorded (newest = 0).
    pub relative: usize,
    pub submission: u64,
    /// False if the generation is still being recorded.
    pub finished: bool,
    pub slots: Vec<SlotEntry>,
}

/// A ring of `generations` marker arrays of `capacity` slots each, in
/// GPU-writable memory.
///
/// The owning stream is the only writer. Any thread may read the history at
/// any time: all bookkeeping is atomic and marker memory is read word by word.
pub struct BreadcrumbBuffer {
    config: BreadcrumbConfig,
    memory: Box<dyn MarkerMemory>,
    /// CPU-side copy of the tag recorded in each slot.
    tags: Box<[AtomicU16]>,
    generations: Box<[Generation]>,
    current: AtomicUsize,
}

impl BreadcrumbBuffer {
    /// Allocate marker memory from `device` and start generation 0.
    pub fn allocate<D: CommandDevice>(
        device: &D,
        config: BreadcrumbConfig,
    ) -> Result<BreadcrumbBuffer, RecorderError> {
        let memory = device.create_marker_memory(config.words()?)?;
        BreadcrumbBuffer::with_memory(memory, config)
    }

    /// Use existing marker memory, which must hold at least
    /// `generations * capacity` words.
    pub fn with_memory(
        memory: Box<dyn MarkerMemory>,
        config: BreadcrumbConfig,
    ) -> Result<BreadcrumbBuffer, RecorderError> {
        let words = config.words()?;
        if memory.len() < words {
            return Err(RecorderError::OutOfMemory(words * 4));
        }
        let buffer = BreadcrumbBuffer {
            config,
            memory,
            tags: (0..words).map(|_| AtomicU16::new(0)).collect(),
            generations: (0..config.generations).map(|_| Generation::new()).collect(),
            current: AtomicUsize::new(0),
        };
        buffer.begin_generation(0, 0);
        Ok(buffer)
    }

    pub fn config(&self) -> BreadcrumbConfig {
        self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// The generation currently being recorded.
    pub fn current_generation(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// The GPU address of a marker slot.
    pub fn marker_address(&self, generation: usize, slot: usize) -> GpuAddress {
        let word = generation * self.config.capacity + slot;
        self.memory.gpu_address() + (word as u64) * 4
    }

    /// Read a marker slot back from GPU memory.
    pub fn marker(&self, generation: usize, slot: usize) -> Marker {
        Marker(self.memory.read(generation * self.config.capacity + slot))
    }

    /// Clear `generation` and make it current.
    pub(crate) fn begin_generation(&self, generation: usize, submission: u64) {
        let start = generation * self.config.capacity;
        self.memory.zero(start..start + self.config.capacity);
        let meta = &self.generations[generation];
        meta.reached.store(0, Ordering::Release);
        meta.high_water.store(UNFINISHED, Ordering::Release);
        meta.submission.store(submission, Ordering::Release);
        meta.overflowed.store(false, Ordering::Relaxed);
        meta.used.store(true, Ordering::Release);
        self.current.store(generation, Ordering::Release);
        trace!("breadcrumbs: generation {} for submission {}", generation, submission);
    }

    /// Note that `slot` of `generation` was recorded for `tag`.
    pub(crate) fn record_reached(&self, generation: usize, slot: usize, tag: OperationTag) {
        self.tags[generation * self.config.capacity + slot].store(tag.raw() as u16, Ordering::Relaxed);
        self.generations[generation]
            .reached
            .fetch_max(slot + 1, Ordering::Release);
    }

    /// Returns true the first time a generation runs out of slots.
    pub(crate) fn note_overflow(&self, generation: usize) -> bool {
        !self.generations[generation]
            .overflowed
            .swap(true, Ordering::Relaxed)
    }

    /// Record the high-water mark of `generation`.
    pub(crate) fn finish(&self, generation: usize) {
        let meta = &self.generations[generation];
        let reached = meta.reached.load(Ordering::Acquire);
        meta.high_water.store(reached, Ordering::Release);
    }

    /// The history of every generation used so far, oldest first.
    pub fn history(&self) -> Vec<GenerationHistory> {
        let generations = self.config.generations;
        let current = self.current_generation();
        let mut out = Vec::with_capacity(generations);
        for relative in (0..generations).rev() {
            let generation = (current + generations - relative) % generations;
            let meta = &self.generations[generation];
            if !meta.used.load(Ordering::Acquire) {
                continue;
            }
            let high_water = meta.high_water.load(Ordering::Acquire);
            let finished = high_water != UNFINISHED;
            let count = if finished {
                high_water
            } else {
                meta.reached.load(Ordering::Acquire)
            }
            .min(self.config.capacity);
            let base = generation * self.config.capacity;
            let slots = (0..count)
                .map(|index| SlotEntry {
                    index,
                    tag: self.tags[base + index].load(Ordering::Relaxed) as u32,
                    marker: Marker(self.memory.read(base + index)),
                })
                .collect();
            out.push(GenerationHistory {
                relative,
                submission: meta.submission.load(Ordering::Acquire),
                finished,
                slots,
            });
        }
        out
    }

    /// Print the history of every generation used so far, oldest first.
    pub fn print<T: Write + ?Sized>(&self, w: &mut T) -> io::Result<()> {
        for generation in self.history() {
            writeln!(
                w,
                "  Submission {} (#{}){}: {} markers",
                -(generation.relative as i64),
                generation.submission,
                if generation.finished { "" } else { " [recording]" },
                generation.slots.len()
            )?;
            for slot in &generation.slots {
                let line = format!(
                    "    {:>5}: {:<48} {}",
                    slot.index,
                    slot.name(),
                    slot.status().label()
                );
                writeln!(w, "{}", line.trim_end())?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for BreadcrumbBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BreadcrumbBuffer")
            .field("config", &self.config)
            .field("gpu_address", &self.memory.gpu_address())
            .field("current", &self.current_generation())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::software::SoftwareDevice;

    #[test]
    fn test_zero_generations_is_rejected() {
        let device = SoftwareDevice::new();
        let config = BreadcrumbConfig {
            generations: 0,
            capacity: 16,
        };
        assert!(matches!(
            BreadcrumbBuffer::allocate(&device, config),
            Err(RecorderError::InvalidConfig(_))
        ));

        let memory = device.create_marker_memory(16).unwrap();
        assert!(matches!(
            BreadcrumbBuffer::with_memory(memory, config),
            Err(RecorderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_oversized_config_is_rejected() {
        let config = BreadcrumbConfig {
            generations: usize::MAX,
            capacity: 2,
        };
        assert!(matches!(config.words(), Err(RecorderError::InvalidConfig(_))));
        assert_eq!(BreadcrumbConfig::default().with_generations(0).generations, 1);
        assert_eq!(BreadcrumbConfig::default().words(), Ok(4 * 65535));
    }
}

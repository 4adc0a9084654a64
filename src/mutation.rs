//! Byte mutation engine.
//!
//! [`mutate`] walks a buffer from `start` to `min(len, end)` in `step`
//! increments and applies exactly one [`Operation`] at each visited offset.
//! Every candidate byte is offered to a [`ByteGuard`] before it is committed;
//! a rejected candidate leaves the byte unchanged and is not counted.
//!
//! The engine never fails.  Offsets whose partner position falls outside the
//! buffer (or outside the configured window, for `Swap`) are skipped silently.
//!
//! # Randomness
//! `Random` draws from a ChaCha8 generator seeded from the OS per call, so two
//! corruptions running on different threads never share a stream.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attempts made by `Random` before giving up on an offset.
pub const RANDOM_RETRY_LIMIT: usize = 100;

// ── Operation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Nothing configured; the engine returns immediately.
    None,
    Shift,
    Swap,
    Add,
    Set,
    Random,
    RotateLeft,
    RotateRight,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalComplement,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::None,
        Operation::Shift,
        Operation::Swap,
        Operation::Add,
        Operation::Set,
        Operation::Random,
        Operation::RotateLeft,
        Operation::RotateRight,
        Operation::LogicalAnd,
        Operation::LogicalOr,
        Operation::LogicalXor,
        Operation::LogicalComplement,
    ];

    /// Flag-style name, e.g. `"rotate-left"`.
    pub fn name(self) -> &'static str {
        match self {
            Operation::None              => "none",
            Operation::Shift             => "shift",
            Operation::Swap              => "swap",
            Operation::Add               => "add",
            Operation::Set               => "set",
            Operation::Random            => "random",
            Operation::RotateLeft        => "rotate-left",
            Operation::RotateRight       => "rotate-right",
            Operation::LogicalAnd        => "logical-and",
            Operation::LogicalOr         => "logical-or",
            Operation::LogicalXor        => "logical-xor",
            Operation::LogicalComplement => "logical-complement",
        }
    }

    pub fn from_name(s: &str) -> Result<Self, ConfigError> {
        let lower = s.to_lowercase();
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == lower)
            .ok_or_else(|| ConfigError::UnsupportedOperation(s.to_owned()))
    }

    /// Whether the operation reads `MutationConfig::value`.
    pub fn takes_operand(self) -> bool {
        !matches!(self, Operation::None | Operation::Random | Operation::LogicalComplement)
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("step must be at least 1")]
    ZeroStep,
    #[error("start offset {start:#x} is past end offset {end:#x}")]
    InvertedRange { start: usize, end: usize },
    #[error("unsupported mutation operation: {0}")]
    UnsupportedOperation(String),
}

// ── MutationConfig ───────────────────────────────────────────────────────────

/// Immutable mutation policy shared by every pass of one corruption job.
///
/// Deserialising goes through the same checks as the builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct MutationConfig {
    operation: Operation,
    value:     i64,
    step:      usize,
    start:     usize,
    end:       usize,
}

impl MutationConfig {
    /// Operation over the whole buffer with `step = 1`.
    pub fn new(operation: Operation, value: i64) -> Self {
        Self { operation, value, step: 1, start: 0, end: usize::MAX }
    }

    pub fn with_step(mut self, step: usize) -> Result<Self, ConfigError> {
        if step == 0 {
            return Err(ConfigError::ZeroStep);
        }
        self.step = step;
        Ok(self)
    }

    /// Half-open offset window `[start, end)`.
    pub fn with_range(mut self, start: usize, end: usize) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvertedRange { start, end });
        }
        self.start = start;
        self.end = end;
        Ok(self)
    }

    pub fn operation(&self) -> Operation { self.operation }
    pub fn value(&self)     -> i64       { self.value }
    pub fn step(&self)      -> usize     { self.step }
    pub fn start(&self)     -> usize     { self.start }
    pub fn end(&self)       -> usize     { self.end }

    /// Low byte of the operand, as used by the arithmetic and logical ops.
    #[inline]
    fn operand_byte(&self) -> u8 {
        self.value as u8
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self::new(Operation::None, 0)
    }
}

#[derive(Deserialize)]
struct RawConfig {
    operation: Operation,
    value:     i64,
    step:      usize,
    start:     usize,
    end:       usize,
}

impl TryFrom<RawConfig> for MutationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        MutationConfig::new(raw.operation, raw.value)
            .with_step(raw.step)?
            .with_range(raw.start, raw.end)
    }
}

// ── Validity guard ───────────────────────────────────────────────────────────

/// Where a candidate byte would be written.
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    /// The slice currently being mutated, as it stands before the write.
    pub window: &'a [u8],
    /// Offset of the write within `window`.
    pub local:  usize,
    /// Offset of `window[0]` within the top-level buffer.
    pub base:   usize,
}

impl Site<'_> {
    #[inline]
    pub fn absolute(&self) -> usize {
        self.base + self.local
    }
}

/// Decides whether a candidate byte may be written at a site.
///
/// Console-specific opcode tables live behind this trait, outside the crate.
/// Any `Fn(u8, usize) -> bool` closure is a guard that sees the candidate and
/// the absolute offset; implement the trait directly to inspect neighbours.
pub trait ByteGuard {
    fn allows(&self, candidate: u8, site: Site<'_>) -> bool;
}

impl<F> ByteGuard for F
where
    F: Fn(u8, usize) -> bool,
{
    #[inline]
    fn allows(&self, candidate: u8, site: Site<'_>) -> bool {
        self(candidate, site.absolute())
    }
}

/// Accepts every byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unguarded;

impl ByteGuard for Unguarded {
    #[inline]
    fn allows(&self, _: u8, _: Site<'_>) -> bool {
        true
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Mutate `buf` in place and return the number of bytes changed.
///
/// `base` is the absolute offset of `buf` inside the buffer the guard reasons
/// about; pass 0 for a top-level buffer.
pub fn mutate<G: ByteGuard + ?Sized>(
    buf:    &mut [u8],
    config: &MutationConfig,
    guard:  &G,
    base:   usize,
) -> u64 {
    let mut rng = ChaCha8Rng::from_os_rng();
    mutate_with_rng(buf, config, guard, base, &mut rng)
}

/// [`mutate`] with a caller-supplied generator (used by tests for replayable
/// `Random` passes).
pub fn mutate_with_rng<G, R>(
    buf:    &mut [u8],
    config: &MutationConfig,
    guard:  &G,
    base:   usize,
    rng:    &mut R,
) -> u64
where
    G: ByteGuard + ?Sized,
    R: Rng + ?Sized,
{
    if config.operation == Operation::None {
        return 0;
    }

    let limit = buf.len().min(config.end);
    let step = config.step.max(1);
    let mut changed = 0u64;
    let mut offset = config.start;

    while offset < limit {
        if apply_at(buf, offset, limit, config, guard, base, rng) {
            changed += 1;
        }
        offset = match offset.checked_add(step) {
            Some(next) => next,
            None       => break,
        };
    }

    changed
}

/// Signed partner position for Shift/Swap, if it lands inside `0..bound`.
#[inline]
fn partner(offset: usize, value: i64, bound: usize) -> Option<usize> {
    let target = (offset as i128) + (value as i128);
    if target < 0 || target >= bound as i128 {
        None
    } else {
        Some(target as usize)
    }
}

fn apply_at<G, R>(
    buf:    &mut [u8],
    offset: usize,
    limit:  usize,
    config: &MutationConfig,
    guard:  &G,
    base:   usize,
    rng:    &mut R,
) -> bool
where
    G: ByteGuard + ?Sized,
    R: Rng + ?Sized,
{
    let here = Site { window: buf, local: offset, base };
    let current = buf[offset];

    let candidate = match config.operation {
        Operation::None => return false,

        Operation::Shift => {
            let Some(src) = partner(offset, config.value, buf.len()) else { return false };
            buf[src]
        }

        Operation::Swap => {
            let Some(other) = partner(offset, config.value, limit) else { return false };
            if other < config.start {
                return false;
            }
            let incoming = buf[other];
            let there = Site { window: buf, local: other, base };
            if !guard.allows(incoming, here) || !guard.allows(current, there) {
                return false;
            }
            buf.swap(offset, other);
            return true;
        }

        Operation::Random => {
            for _ in 0..RANDOM_RETRY_LIMIT {
                let byte: u8 = rng.random();
                if guard.allows(byte, Site { window: buf, local: offset, base }) {
                    buf[offset] = byte;
                    return true;
                }
            }
            return false;
        }

        Operation::Add               => current.wrapping_add(config.operand_byte()),
        Operation::Set               => config.operand_byte(),
        Operation::RotateLeft        => current.rotate_left(config.value.rem_euclid(8) as u32),
        Operation::RotateRight       => current.rotate_right(config.value.rem_euclid(8) as u32),
        Operation::LogicalAnd        => current & config.operand_byte(),
        Operation::LogicalOr         => current | config.operand_byte(),
        Operation::LogicalXor        => current ^ config.operand_byte(),
        Operation::LogicalComplement => !current,
    };

    if !guard.allows(candidate, here) {
        return false;
    }
    buf[offset] = candidate;
    true
}

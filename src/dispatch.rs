//! Container dispatcher: the recursive corruption pass.
//!
//! One call to [`Dispatcher::run`] takes a file's bytes through:
//!
//! ```text
//! decode (Yaz0/Yay0) ─► sniff ─┬─ RARC ─────► recurse into each file entry
//!                              ├─ U8 ───────► recurse into each file entry
//!                              ├─ J3D ──────► mutate each sub-block window
//!                              ├─ other J3D ► leave untouched
//!                              └─ otherwise ► mutate the whole buffer
//! ```
//!
//! Every nested pass works on a copy of its slice and is spliced back at the
//! same offset only when it succeeds, so a failing entry leaves its bytes
//! untouched.  Slices never change length.  Entries whose payload is itself
//! compressed, or that cover their whole parent, are skipped.  Containers
//! nested more than [`MAX_NESTING`] levels deep fail at the entry boundary.
//!
//! Errors from the top-level buffer propagate; errors from entries and
//! sub-blocks are logged and counted in [`DispatchReport::entries_skipped`].

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveEntry, ArchiveError, EntryInfo};
use crate::codec::{self, yaz0, CodecError, CodecId};
use crate::j3d::{self, J3dFile, J3dKind, SubBlock};
use crate::mutation::{mutate, ByteGuard, MutationConfig, Unguarded};
use crate::rarc::{self, RarcArchive};
use crate::u8arc::{self, U8Archive};

/// Deepest container level the dispatcher descends to; the top-level buffer
/// is level 0.
pub const MAX_NESTING: usize = 16;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("containers nested deeper than {} levels", MAX_NESTING)]
    TooDeep,
}

// ── ContainerKind ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Rarc,
    U8,
    Model,
    Materials,
    Animation,
    /// A `J3D1`/`J3D2` variant with no known layout; left untouched.
    #[serde(rename = "j3d")]
    OtherJ3d,
    /// No recognised structure; mutated as one leaf payload.
    Raw,
}

impl ContainerKind {
    /// Identify a (decoded) buffer by its leading magic.
    pub fn sniff(data: &[u8]) -> Self {
        if rarc::matches(data) {
            return ContainerKind::Rarc;
        }
        if u8arc::matches(data) {
            return ContainerKind::U8;
        }
        match j3d::sniff(data) {
            Some(J3dKind::Model)         => ContainerKind::Model,
            Some(J3dKind::Materials)     => ContainerKind::Materials,
            Some(J3dKind::Animation)     => ContainerKind::Animation,
            None if j3d::is_family(data) => ContainerKind::OtherJ3d,
            None                         => ContainerKind::Raw,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ContainerKind::Rarc      => "rarc",
            ContainerKind::U8        => "u8",
            ContainerKind::Model     => "model",
            ContainerKind::Materials => "materials",
            ContainerKind::Animation => "animation",
            ContainerKind::OtherJ3d  => "j3d",
            ContainerKind::Raw       => "raw",
        }
    }
}

// ── Options & report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Re-encode a compressed input after corruption.  Only Yaz0 can be
    /// re-encoded; Yay0 input is written decoded either way.
    pub recompress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub codec:             CodecId,
    pub container:         ContainerKind,
    pub mutations:         u64,
    pub entries_processed: usize,
    pub entries_skipped:   usize,
    /// Whether the output was re-encoded with `codec`.
    pub recompressed:      bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    mutations: u64,
    processed: usize,
    skipped:   usize,
}

impl Tally {
    fn absorb(&mut self, other: Tally) {
        self.mutations += other.mutations;
        self.processed += other.processed;
        self.skipped += other.skipped;
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Applies one [`MutationConfig`] to a buffer and everything nested in it.
pub struct Dispatcher<'a, G: ByteGuard + ?Sized = Unguarded> {
    config:  &'a MutationConfig,
    guard:   &'a G,
    options: DispatchOptions,
}

impl<'a> Dispatcher<'a, Unguarded> {
    pub fn unguarded(config: &'a MutationConfig) -> Self {
        Self::new(config, &Unguarded)
    }
}

impl<'a, G: ByteGuard + ?Sized> Dispatcher<'a, G> {
    pub fn new(config: &'a MutationConfig, guard: &'a G) -> Self {
        Self { config, guard, options: DispatchOptions::default() }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Corrupt a complete file image and return the bytes to write.
    ///
    /// The output has the input's length unless the input was compressed, in
    /// which case it is either the decoded image or, with
    /// [`DispatchOptions::recompress`], a fresh Yaz0 stream.
    pub fn run(&self, input: &[u8]) -> Result<(Vec<u8>, DispatchReport), DispatchError> {
        let (codec, mut buf) = codec::decompress(input)?;
        if codec != CodecId::None {
            debug!(codec = codec.name(), packed = input.len(), unpacked = buf.len(), "decoded input");
        }

        let mut tally = Tally::default();
        let container = self.corrupt(&mut buf, 0, 0, &mut tally)?;

        let recompressed = match (codec, self.options.recompress) {
            (CodecId::Yaz0, true) => {
                buf = yaz0::encode(&buf);
                true
            }
            (CodecId::Yay0, true) => {
                warn!("Yay0 cannot be re-encoded; writing decoded output");
                false
            }
            _ => false,
        };

        let report = DispatchReport {
            codec,
            container,
            mutations:         tally.mutations,
            entries_processed: tally.processed,
            entries_skipped:   tally.skipped,
            recompressed,
        };
        info!(
            container = container.name(),
            mutations = report.mutations,
            processed = report.entries_processed,
            skipped = report.entries_skipped,
            "corruption pass finished"
        );
        Ok((buf, report))
    }

    /// Corrupt an already-decoded buffer in place.  `base` is its offset in
    /// the top-level buffer, forwarded to the guard.
    pub fn corrupt_in_place(&self, buf: &mut [u8], base: usize) -> Result<DispatchReport, DispatchError> {
        let mut tally = Tally::default();
        let container = self.corrupt(buf, base, 0, &mut tally)?;
        Ok(DispatchReport {
            codec: CodecId::None,
            container,
            mutations:         tally.mutations,
            entries_processed: tally.processed,
            entries_skipped:   tally.skipped,
            recompressed:      false,
        })
    }

    fn corrupt(
        &self,
        buf: &mut [u8],
        base: usize,
        depth: usize,
        tally: &mut Tally,
    ) -> Result<ContainerKind, DispatchError> {
        if depth > MAX_NESTING {
            return Err(DispatchError::TooDeep);
        }
        let kind = ContainerKind::sniff(buf);
        match kind {
            ContainerKind::Rarc => {
                let files: Vec<ArchiveEntry> = RarcArchive::parse(buf)?.files().cloned().collect();
                self.corrupt_entries(buf, base, depth, &files, tally);
            }
            ContainerKind::U8 => {
                let files: Vec<ArchiveEntry> = U8Archive::parse(buf)?.files().cloned().collect();
                self.corrupt_entries(buf, base, depth, &files, tally);
            }
            ContainerKind::Model | ContainerKind::Materials | ContainerKind::Animation => {
                let file = J3dFile::parse(buf)?;
                self.corrupt_blocks(buf, base, file.blocks(), tally);
            }
            ContainerKind::OtherJ3d => {
                let magic = &buf[..buf.len().min(8)];
                warn!(magic = %String::from_utf8_lossy(magic), "unsupported J3D variant left untouched");
            }
            ContainerKind::Raw => {
                tally.mutations += mutate(buf, self.config, self.guard, base);
            }
        }
        Ok(kind)
    }

    fn corrupt_entries(
        &self,
        buf: &mut [u8],
        base: usize,
        depth: usize,
        entries: &[ArchiveEntry],
        tally: &mut Tally,
    ) {
        for entry in entries {
            let Some(range) = entry.range() else { continue };
            if range == (0..buf.len()) {
                warn!(path = %entry.path, "entry covers its whole archive, skipped");
                tally.skipped += 1;
                continue;
            }
            let slice = &buf[range.clone()];

            if codec::sniff(slice) != CodecId::None {
                debug!(path = %entry.path, "compressed entry, skipped");
                tally.skipped += 1;
                continue;
            }

            let mut copy = slice.to_vec();
            let mut child = Tally::default();
            match self.corrupt(&mut copy, base + range.start, depth + 1, &mut child) {
                Ok(kind) => {
                    buf[range].copy_from_slice(&copy);
                    debug!(path = %entry.path, kind = kind.name(), mutations = child.mutations, "entry corrupted");
                    tally.absorb(child);
                    tally.processed += 1;
                }
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "entry skipped");
                    tally.skipped += 1;
                }
            }
        }
    }

    fn corrupt_blocks(&self, buf: &mut [u8], base: usize, blocks: &[SubBlock], tally: &mut Tally) {
        for block in blocks {
            let range = block.window();
            let window = &mut buf[range.clone()];
            let changed = mutate(window, self.config, self.guard, base + range.start);
            debug!(block = %block.role, begin = range.start, end = range.end, mutations = changed, "block corrupted");
            tally.mutations += changed;
            tally.processed += 1;
        }
    }
}

// ── Inspection ───────────────────────────────────────────────────────────────

/// What `list` shows for one file.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub codec:     CodecId,
    pub container: ContainerKind,
    pub size:      usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries:   Vec<EntryInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks:    Vec<SubBlock>,
}

/// Decode and describe a file without mutating it.
pub fn inspect(input: &[u8]) -> Result<Listing, DispatchError> {
    let (codec, buf) = codec::decompress(input)?;
    let container = ContainerKind::sniff(&buf);

    let (entries, blocks) = match container {
        ContainerKind::Rarc => {
            let ar = RarcArchive::parse(&buf)?;
            (ar.entries().map(|e| EntryInfo::describe(e, &buf)).collect(), Vec::new())
        }
        ContainerKind::U8 => {
            let ar = U8Archive::parse(&buf)?;
            (ar.entries().map(|e| EntryInfo::describe(e, &buf)).collect(), Vec::new())
        }
        ContainerKind::Model | ContainerKind::Materials | ContainerKind::Animation => {
            (Vec::new(), J3dFile::parse(&buf)?.blocks().to_vec())
        }
        ContainerKind::OtherJ3d | ContainerKind::Raw => (Vec::new(), Vec::new()),
    };

    Ok(Listing { codec, container, size: buf.len(), entries, blocks })
}

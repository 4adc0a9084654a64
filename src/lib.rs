pub mod mutation;
pub mod codec;
pub mod archive;
pub mod rarc;
pub mod u8arc;
pub mod j3d;
pub mod dispatch;
pub mod job;
pub mod batch;

pub use mutation::{mutate, ByteGuard, MutationConfig, Operation, Unguarded};
pub use codec::{CodecId, get_codec};
pub use archive::{ArchiveEntry, ArchiveError};
pub use dispatch::{ContainerKind, DispatchOptions, DispatchReport, Dispatcher};
pub use job::{CorruptionJob, JobReport};

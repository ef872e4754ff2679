//! # mockd recorder
//!
//! Live stream recording and replay. WebSocket and SSE handlers attach a
//! [`RecorderSession`] to a connection; every frame is journaled to an
//! append-only ndjson file with a strictly increasing sequence number and
//! a hook-entry timestamp. The [`FileStore`] coordinates the on-disk
//! recordings (listing, soft delete, vacuum, export) and the
//! [`ReplayController`] plays journals back in pure (paced) or triggered
//! (nudged) mode.
//!
//! Layout under the data directory:
//!
//! ```text
//! recordings/<id>/meta.json       # metadata + rollup stats
//! recordings/<id>/journal.ndjson  # one frame per line
//! ```

pub mod convert;
pub mod journal;
pub mod recorder;
pub mod replay;
pub mod store;

pub use convert::recording_to_mock;
pub use journal::{
    FrameDirection, FrameKind, OriginMetadata, RecordedFrame, RecordingExport, RecordingMeta,
    RecordingStatus, RollupStats, StreamProtocol,
};
pub use recorder::RecorderSession;
pub use replay::{ReplayConfig, ReplayController, ReplayMode, ReplaySession, ReplayStatus};
pub use store::{FileStore, RecordingFilter, StoreLimits, StoreStats};

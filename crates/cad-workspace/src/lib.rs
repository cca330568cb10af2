//! Workspace snapshot and diff for attributing file changes to a model call.

mod snapshot;

pub use snapshot::{EXCLUDED_DIRS, FileStamp, Snapshot, diff, snapshot};

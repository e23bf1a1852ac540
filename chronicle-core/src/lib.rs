/*!
# Chronicle Core Engine

Snapshot-based versioning for application objects.

This crate captures the state of domain objects ("subjects") as structured
payloads, stores them through pluggable storage drivers and provides:

- Serialization with hidden fields, timestamp separation and bounded
  relationship traversal
- Attribute-level diffs between any two snapshots
- Restore of a live object from one of its snapshots
- Time-based retention
- Memory, file and SQLite storage drivers behind one trait

## Architecture

The core keeps domain logic apart from infrastructure:
- Subjects are described by the [`Snapshotable`] and [`Restorable`] traits,
  implemented by the host application
- Storage is an adapter behind [`StorageDriver`]
- [`SnapshotManager`] is the facade tying both together

## Usage

```rust
use chronicle_core::{DocumentSubject, MemoryStorage, SnapshotManager};
use serde_json::json;

let manager = SnapshotManager::new(MemoryStorage::new());
let mut user = DocumentSubject::new(
    "app::User",
    json!({"id": 42, "name": "Alice", "age": 30}).as_object().cloned().unwrap(),
);

manager.capture_manual(&user, Some("v1"))?;
user.set("age", json!(31));

// Roll the live object back to v1
manager.restore(&mut user, "v1")?;
assert_eq!(user.get("age"), Some(&json!(30)));
# Ok::<(), chronicle_core::ChronicleError>(())
```
*/

pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod observability;
pub mod payload;
pub mod record;
pub mod report;
pub mod restore;
pub mod retention;
pub mod serialize;
pub mod snapshot;
pub mod storage;
pub mod subject;


pub use config::{
    AutomaticCaptureConfig, ChronicleConfig, RetentionConfig, StorageBackend, StorageConfig,
};
pub use diff::{diff, Change, DiffResult};
pub use document::DocumentSubject;
pub use error::{ChronicleError, Result};
pub use payload::{Attributes, Payload, RelatedPayload};
pub use record::{CaptureMeta, EventType, LifecycleEvent, SnapshotFilter, SnapshotId, SnapshotRecord};
pub use report::ReportFormat;
pub use restore::RestoreOutcome;
pub use serialize::{serialize, SerializeOptions};
pub use snapshot::{create_manager_from_config, BatchSummary, LifecycleObserver, SnapshotManager};
pub use storage::{FileStorage, MemoryStorage, StorageDriver};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use subject::{Related, Restorable, Snapshotable};

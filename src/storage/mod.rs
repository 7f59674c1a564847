pub mod journal;
pub mod snapshot;

pub use journal::{JournalReplay, WordsJournal};
pub use snapshot::SnapshotStore;

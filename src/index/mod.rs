pub mod control;
pub mod domain;
pub mod generation;
pub mod lexicon;
pub mod postings;
pub mod staging;

pub use control::{IndexControl, MaintenanceState, MaintenanceTicket, Operation};
pub use domain::{DocumentSet, DomainIndex};
pub use generation::{GenerationBuilder, GenerationSnapshot, IndexGeneration};
pub use lexicon::Lexicon;
pub use postings::{PostingsBuilder, PostingsList, PostingsStore};
pub use staging::Staging;

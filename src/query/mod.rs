pub mod anchors;
pub mod evaluator;
pub mod scoring;
pub mod server;

pub use anchors::*;
pub use evaluator::*;
pub use scoring::*;
pub use server::*;

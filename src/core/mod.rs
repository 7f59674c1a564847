pub mod adaptive;
pub mod batch;
pub mod partition;
pub mod term;
pub mod types;

pub use adaptive::*;
pub use batch::*;
pub use partition::*;
pub use term::*;
pub use types::*;

pub mod text;

// Re-export the splitting entry points for external use
pub use text::{Passage, PassageSplitter, SplitError, reconstruct, split};

pub mod dependencies;

pub use dependencies::{Cycle, DependencyCollector};

pub mod paths;
pub mod snapshot;

pub use paths::*;
pub use snapshot::*;

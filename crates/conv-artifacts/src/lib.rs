pub mod golden;
pub mod lock;
pub mod manifest;
pub mod report;
pub mod store;
pub mod summary;

pub use golden::*;
pub use lock::*;
pub use manifest::*;
pub use report::*;
pub use store::*;
pub use summary::*;

pub mod config;
pub mod harness;
pub mod options;
pub mod pipeline;
pub mod reporting;

pub use config::*;
pub use harness::*;
pub use options::*;
pub use pipeline::*;
pub use reporting::*;

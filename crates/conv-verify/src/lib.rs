pub mod compare;
pub mod golden;
pub mod runner;
pub mod template;
pub mod udiff;
pub mod vectors;

pub use compare::*;
pub use golden::*;
pub use runner::*;
pub use template::*;
pub use udiff::*;
pub use vectors::*;

pub mod interrupt;
pub mod process;

pub use interrupt::*;
pub use process::*;

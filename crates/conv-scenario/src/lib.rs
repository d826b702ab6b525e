pub mod descriptor;
pub mod notes;
pub mod store;

pub use descriptor::*;
pub use notes::*;
pub use store::*;

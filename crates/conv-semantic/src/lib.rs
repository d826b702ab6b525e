pub mod engine;
pub mod mapping;
pub mod render;
pub mod rule;
pub mod vocabulary;

pub use engine::*;
pub use mapping::*;
pub use render::*;
pub use rule::*;
pub use vocabulary::*;

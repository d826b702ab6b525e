pub mod engine;
pub mod error;
pub mod ids;
pub mod model;
pub mod types;

pub use engine::*;
pub use error::*;
pub use ids::*;
pub use model::*;
pub use types::*;

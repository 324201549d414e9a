pub mod api;
pub mod model;

pub use api::ChainSource;
pub use model::*;

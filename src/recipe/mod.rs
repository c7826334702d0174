pub mod definition;
pub mod store;
pub mod template;

pub use definition::{LlmParams, PlaylistType, Recipe, StrategyParams};
pub use store::{RecipeError, RecipeStore};

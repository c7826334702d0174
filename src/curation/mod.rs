pub mod engine;
pub mod fallback;
pub mod prefilter;
pub mod response;
pub mod utils;

pub use engine::{CurationEngine, CurationRequest, CurationResult, Provenance};
pub use utils::PlaylistNaming;

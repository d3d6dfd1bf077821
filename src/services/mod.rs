pub mod database; // Per-vendor connections behind one trait
pub mod dialect;
pub mod federation;
pub mod import;
pub mod rewrite;
pub mod shape_engine;

pub use dialect::*;
pub use federation::*;
pub use import::*;
pub use rewrite::*;
pub use shape_engine::*;

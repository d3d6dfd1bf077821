pub mod panel;
pub mod shape;

pub use panel::*;
pub use shape::*;

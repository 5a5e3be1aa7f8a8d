pub mod common;
pub mod gemini;
pub mod image;
pub mod usage;

pub use common::*;
pub use image::*;
pub use usage::*;

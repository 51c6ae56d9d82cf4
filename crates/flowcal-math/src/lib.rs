//! flowcal math utilities.

pub mod math;

pub use math::choice::*;
pub use math::gaussian::*;
pub use math::stable::*;
pub use math::summary::*;

//! Core math modules.

pub mod choice;
pub mod gaussian;
pub mod stable;
pub mod summary;

//! OS integration seams.

pub mod trash;

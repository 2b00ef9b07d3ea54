//! PDF primitives: page geometry, base fonts, page construction, and merging.

pub mod builder;
pub mod fonts;
pub mod geometry;
pub mod merge;

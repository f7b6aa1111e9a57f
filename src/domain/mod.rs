//! Domain layer: persisted entities and the repository contracts over them.

pub mod entities;
pub mod repositories;

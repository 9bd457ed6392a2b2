//! Persistence of fitted models.

pub mod serialization;

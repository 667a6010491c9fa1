// kibitz-common: shared types for the Kibitz version-control layer

pub mod branch;
pub mod mirror;
pub mod protocol;
pub mod types;

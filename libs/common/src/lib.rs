//! Identifiers shared by the community services.

pub mod id;

//! CLI command implementations.

pub mod extract;
pub mod inspect;
pub mod list;
pub mod pack;
pub mod parsers;

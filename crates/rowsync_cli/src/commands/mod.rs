//! CLI command implementations.

pub mod dump_part;
pub mod inspect;
pub mod verify;

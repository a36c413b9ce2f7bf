//! Batch files on disk: the part file codec and the directory layout.

mod codec;
mod directory;

pub use codec::{CborRowCodec, PartReader, PartWriter, RowCodec, PART_MAGIC, PART_VERSION};
pub use directory::BatchDirectory;

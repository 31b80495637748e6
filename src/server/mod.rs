pub mod entry;
pub mod shard;
pub mod updater;

pub use entry::{ScalarAux, ServerEntry};
pub use shard::Shard;

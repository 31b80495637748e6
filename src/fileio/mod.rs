pub mod libsvm;

use crate::data::RowBlock;
use crate::data::FeaId;
use crate::error::Result;

/// A minibatch iterator over one file part, per spec.md §6. Shuffling and
/// negative sampling are the reader's responsibility; `next_batch` returns
/// `None` once the part is exhausted.
pub trait ShardReader {
    fn next_batch(&mut self, batch_size: usize) -> Result<Option<RowBlock<FeaId>>>;
}

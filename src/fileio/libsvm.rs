//! A minimal streaming reader for one LIBSVM-formatted file part: the
//! simplest concrete `ShardReader` so the pipeline has a runnable
//! end-to-end path (spec.md §6 leaves the actual format parsers as
//! collaborators; `adfea`, `criteo` and `svdfeature` are not implemented
//! here; see `original_source/learn/*/base/*parser.h`).
//!
//! Line `i` of the file belongs to this part when `i % part_n == part_k`.
//! A shuffle ring of `shuffle_window` rows is maintained before rows are
//! emitted; rows with a non-positive label are dropped with probability
//! `1 - neg_sampling_rate`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::{FeaId, Row, RowBlock};
use crate::error::{Result, TrainerError};
use crate::fileio::ShardReader;

pub struct LibsvmShardReader {
    lines: std::io::Lines<BufReader<File>>,
    line_idx: usize,
    part_k: usize,
    part_n: usize,
    neg_sampling_rate: f32,
    shuffle_window: usize,
    buffer: VecDeque<Row>,
    rng: StdRng,
    source_exhausted: bool,
}

impl LibsvmShardReader {
    pub fn open(
        path: impl AsRef<Path>,
        part_k: usize,
        part_n: usize,
        shuffle_window: usize,
        neg_sampling_rate: f32,
    ) -> Result<Self> {
        if part_n == 0 || part_k >= part_n {
            return Err(TrainerError::Configuration(format!(
                "invalid file part ({part_k} of {part_n})"
            )));
        }
        let file = File::open(path.as_ref())?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_idx: 0,
            part_k,
            part_n,
            neg_sampling_rate,
            shuffle_window,
            buffer: VecDeque::new(),
            rng: StdRng::from_entropy(),
            source_exhausted: false,
        })
    }

    fn parse_line(line: &str) -> Result<Row> {
        let mut tokens = line.split_whitespace();
        let label_tok = tokens
            .next()
            .ok_or_else(|| TrainerError::DataMalformed("empty row".into()))?;
        let raw_label: f32 = label_tok
            .parse()
            .map_err(|_| TrainerError::DataMalformed(format!("bad label '{label_tok}'")))?;
        let label = if raw_label > 0.0 { 1.0 } else { -1.0 };

        let mut features = Vec::new();
        let mut values = Vec::new();
        for tok in tokens {
            let (idx_str, val_str) = tok
                .split_once(':')
                .ok_or_else(|| TrainerError::DataMalformed(format!("bad feature token '{tok}'")))?;
            let idx: FeaId = idx_str
                .parse()
                .map_err(|_| TrainerError::DataMalformed(format!("bad feature id '{idx_str}'")))?;
            let val: f32 = val_str
                .parse()
                .map_err(|_| TrainerError::DataMalformed(format!("bad feature value '{val_str}'")))?;
            features.push(idx);
            values.push(val);
        }
        Ok(Row::new(label, features).with_values(values))
    }

    /// Advances the source until the shuffle buffer has one extra row to
    /// sample from (or the file is exhausted), then pops a uniformly
    /// sampled row out of it.
    fn fill_and_pop(&mut self) -> Result<Option<Row>> {
        while !self.source_exhausted && self.buffer.len() <= self.shuffle_window {
            match self.lines.next() {
                None => {
                    self.source_exhausted = true;
                    break;
                }
                Some(line) => {
                    let line = line?;
                    let idx = self.line_idx;
                    self.line_idx += 1;
                    if idx % self.part_n != self.part_k {
                        continue;
                    }
                    if line.trim().is_empty() {
                        continue;
                    }
                    let row = Self::parse_line(&line)?;
                    if row.label <= 0.0 && self.rng.gen::<f32>() >= self.neg_sampling_rate {
                        continue;
                    }
                    self.buffer.push_back(row);
                }
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }
        let i = self.rng.gen_range(0..self.buffer.len());
        Ok(self.buffer.remove(i))
    }
}

impl ShardReader for LibsvmShardReader {
    fn next_batch(&mut self, batch_size: usize) -> Result<Option<RowBlock<FeaId>>> {
        let mut rows = Vec::with_capacity(batch_size.min(1024));
        for _ in 0..batch_size {
            match self.fill_and_pop()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(RowBlock::from_rows(&rows)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    #[test]
    fn reads_all_rows_of_a_single_part() {
        let f = write_fixture(&["1 1:1.0 2:2.0", "-1 3:3.0"]);
        let mut reader = LibsvmShardReader::open(f.path(), 0, 1, 0, 1.0).unwrap();
        let block = reader.next_batch(10).unwrap().unwrap();
        assert_eq!(block.num_rows(), 2);
        assert!(reader.next_batch(10).unwrap().is_none());
    }

    #[test]
    fn splits_by_part() {
        let f = write_fixture(&["1 1:1.0", "1 2:1.0", "1 3:1.0", "1 4:1.0"]);
        let mut reader0 = LibsvmShardReader::open(f.path(), 0, 2, 0, 1.0).unwrap();
        let mut total = 0;
        while let Some(block) = reader0.next_batch(10).unwrap() {
            total += block.num_rows();
        }
        assert_eq!(total, 2);
    }

    #[test]
    fn negative_sampling_rate_zero_drops_all_negatives() {
        let f = write_fixture(&["-1 1:1.0", "-1 2:1.0", "1 3:1.0"]);
        let mut reader = LibsvmShardReader::open(f.path(), 0, 1, 0, 0.0).unwrap();
        let block = reader.next_batch(10).unwrap().unwrap();
        assert_eq!(block.num_rows(), 1);
        assert_eq!(block.labels[0], 1.0);
    }

    #[test]
    fn malformed_row_is_a_data_error() {
        let f = write_fixture(&["not-a-label 1:1.0"]);
        let mut reader = LibsvmShardReader::open(f.path(), 0, 1, 0, 1.0).unwrap();
        assert!(reader.next_batch(10).is_err());
    }
}

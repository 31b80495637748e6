//! The progress record both servers and workers periodically report to the
//! scheduler. Fields are purely additive; merging is coordinate-wise sum,
//! and merging the zero record is the identity; this is what lets the
//! scheduler fold reports from every shard and worker without knowing how
//! many of each there are.

use crate::error::{Result, TrainerError};

/// Number of `u64` counters carried by the wire format, in field order.
const INT_FIELDS: usize = 5;
/// Number of `f64` accumulators carried by the wire format, in field order.
const FLOAT_FIELDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    pub examples: u64,
    pub nnz_w: u64,
    pub nnz_v: u64,
    /// Positive-labelled examples seen, needed (with `negative_count`) to
    /// turn `auc_numerator`'s rank-sum into an actual AUC at print time.
    pub positive_count: u64,
    pub negative_count: u64,
    pub objective: f64,
    pub auc_numerator: f64,
    pub logloss: f64,
    pub accuracy_numerator: f64,
}

impl Progress {
    /// Mann-Whitney AUC recovered from the additive rank-sum numerator and
    /// the positive/negative counts accumulated alongside it. `None` when
    /// either class hasn't been observed.
    pub fn auc(&self) -> Option<f64> {
        if self.positive_count == 0 || self.negative_count == 0 {
            return None;
        }
        Some(self.auc_numerator / (self.positive_count * self.negative_count) as f64)
    }

    pub fn accuracy(&self) -> Option<f64> {
        if self.examples == 0 {
            return None;
        }
        Some(self.accuracy_numerator / self.examples as f64)
    }

    pub fn mean_logloss(&self) -> Option<f64> {
        if self.examples == 0 {
            return None;
        }
        Some(self.logloss / self.examples as f64)
    }
}

impl Progress {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Coordinate-wise sum. Commutative and associative; `zero()` is the
    /// identity.
    pub fn merge(&self, other: &Progress) -> Progress {
        Progress {
            examples: self.examples + other.examples,
            nnz_w: self.nnz_w + other.nnz_w,
            nnz_v: self.nnz_v + other.nnz_v,
            positive_count: self.positive_count + other.positive_count,
            negative_count: self.negative_count + other.negative_count,
            objective: self.objective + other.objective,
            auc_numerator: self.auc_numerator + other.auc_numerator,
            logloss: self.logloss + other.logloss,
            accuracy_numerator: self.accuracy_numerator + other.accuracy_numerator,
        }
    }

    /// `(int_count: u64, float_count: u64, int_bytes, float_bytes)` layout
    /// from the progress-reporting protocol, native little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let ints = [
            self.examples,
            self.nnz_w,
            self.nnz_v,
            self.positive_count,
            self.negative_count,
        ];
        let floats = [
            self.objective,
            self.auc_numerator,
            self.logloss,
            self.accuracy_numerator,
        ];

        let mut buf = Vec::with_capacity(16 + ints.len() * 8 + floats.len() * 8);
        buf.extend_from_slice(&(ints.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(floats.len() as u64).to_le_bytes());
        for v in ints {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in floats {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Progress> {
        let read_u64 = |b: &[u8]| -> Result<u64> {
            b.try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| TrainerError::DataMalformed("truncated progress blob".into()))
        };

        if bytes.len() < 16 {
            return Err(TrainerError::DataMalformed(
                "progress blob shorter than its header".into(),
            ));
        }
        let int_count = read_u64(&bytes[0..8])? as usize;
        let float_count = read_u64(&bytes[8..16])? as usize;
        if int_count != INT_FIELDS || float_count != FLOAT_FIELDS {
            return Err(TrainerError::DataMalformed(format!(
                "progress blob field counts ({int_count}, {float_count}) do not match the expected ({INT_FIELDS}, {FLOAT_FIELDS})"
            )));
        }

        let expected_len = 16 + int_count * 8 + float_count * 8;
        if bytes.len() != expected_len {
            return Err(TrainerError::DataMalformed(format!(
                "progress blob length {} does not match expected {expected_len}",
                bytes.len()
            )));
        }

        let mut ints = [0u64; INT_FIELDS];
        for (i, chunk) in bytes[16..16 + int_count * 8].chunks_exact(8).enumerate() {
            ints[i] = read_u64(chunk)?;
        }
        let float_start = 16 + int_count * 8;
        let mut floats = [0f64; FLOAT_FIELDS];
        for (i, chunk) in bytes[float_start..float_start + float_count * 8]
            .chunks_exact(8)
            .enumerate()
        {
            let arr: [u8; 8] = chunk
                .try_into()
                .map_err(|_| TrainerError::DataMalformed("truncated progress float".into()))?;
            floats[i] = f64::from_le_bytes(arr);
        }

        Ok(Progress {
            examples: ints[0],
            nnz_w: ints[1],
            nnz_v: ints[2],
            positive_count: ints[3],
            negative_count: ints[4],
            objective: floats[0],
            auc_numerator: floats[1],
            logloss: floats[2],
            accuracy_numerator: floats[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Progress {
        Progress {
            examples: 3,
            nnz_w: 2,
            nnz_v: 1,
            positive_count: 2,
            negative_count: 1,
            objective: 1.5,
            auc_numerator: 0.9,
            logloss: 0.2,
            accuracy_numerator: 4.0,
        }
    }

    #[test]
    fn zero_is_identity() {
        let p = sample();
        assert_eq!(p.merge(&Progress::zero()), p);
        assert_eq!(Progress::zero().merge(&p), p);
    }

    #[test]
    fn round_trips_through_bytes() {
        let p = sample();
        let bytes = p.to_bytes();
        let round_tripped = Progress::from_bytes(&bytes).unwrap();
        assert_eq!(p, round_tripped);
    }

    #[test]
    fn auc_recovered_from_rank_sum_and_counts() {
        let p = Progress {
            positive_count: 2,
            negative_count: 3,
            auc_numerator: 5.0,
            ..Progress::zero()
        };
        assert_eq!(p.auc(), Some(5.0 / 6.0));
        assert_eq!(Progress::zero().auc(), None);
    }

    proptest! {
        #[test]
        fn merge_is_commutative_and_associative(
            a in any_progress(), b in any_progress(), c in any_progress()
        ) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }
    }

    fn any_progress() -> impl Strategy<Value = Progress> {
        (
            0u64..1_000_000,
            0u64..1_000_000,
            0u64..1_000_000,
            0u64..1_000_000,
            0u64..1_000_000,
            -1e6f64..1e6,
            -1e6f64..1e6,
            -1e6f64..1e6,
            -1e6f64..1e6,
        )
            .prop_map(
                |(examples, nnz_w, nnz_v, positive_count, negative_count, objective, auc_numerator, logloss, accuracy_numerator)| {
                    Progress {
                        examples,
                        nnz_w,
                        nnz_v,
                        positive_count,
                        negative_count,
                        objective,
                        auc_numerator,
                        logloss,
                        accuracy_numerator,
                    }
                },
            )
    }
}

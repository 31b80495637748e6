//! Server-side per-key state. `Scalar` holds no heap allocation, the
//! compact-storage invariant from spec.md §3 translated into a tagged enum
//! instead of the source's pointer-aliasing trick (design note in spec.md
//! §9): the in-memory representation is larger than the source's 24-byte
//! budget, but `size == 1` keys still allocate nothing on the heap, which is
//! the invariant that actually matters for key-count-dominated memory use.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScalarAux {
    pub cg: f32,
    /// FTRL's `z`, or plain-SGD's push counter `t` reinterpreted as a float.
    /// Unused (left at 0) by AdaGrad.
    pub z_or_t: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEntry {
    Scalar {
        w0: f32,
        aux: ScalarAux,
        feature_count: u64,
    },
    Expanded {
        w0: f32,
        embedding: Box<[f32]>,
        aux: ScalarAux,
        embedding_cg: Box<[f32]>,
        feature_count: u64,
    },
}

impl ServerEntry {
    pub fn fresh() -> Self {
        ServerEntry::Scalar {
            w0: 0.0,
            aux: ScalarAux::default(),
            feature_count: 0,
        }
    }

    /// `1` for a scalar-only entry, `1 + d` once expanded.
    pub fn size(&self) -> usize {
        match self {
            ServerEntry::Scalar { .. } => 1,
            ServerEntry::Expanded { embedding, .. } => 1 + embedding.len(),
        }
    }

    pub fn w0(&self) -> f32 {
        match self {
            ServerEntry::Scalar { w0, .. } => *w0,
            ServerEntry::Expanded { w0, .. } => *w0,
        }
    }

    pub fn feature_count(&self) -> u64 {
        match self {
            ServerEntry::Scalar { feature_count, .. } => *feature_count,
            ServerEntry::Expanded { feature_count, .. } => *feature_count,
        }
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self, ServerEntry::Expanded { .. })
    }

    /// Returns the pull-response weight slice verbatim: `[w0]` or
    /// `[w0, v_1, ..., v_d]`.
    pub fn weights_for_pull(&self) -> Vec<f32> {
        match self {
            ServerEntry::Scalar { w0, .. } => vec![*w0],
            ServerEntry::Expanded { w0, embedding, .. } => {
                let mut out = Vec::with_capacity(1 + embedding.len());
                out.push(*w0);
                out.extend_from_slice(embedding);
                out
            }
        }
    }

    /// Raw `(size, weights, auxiliary_state, feature_count)` for checkpoint
    /// serialization, per spec.md §6's on-disk format (extended with the
    /// observation counter so a reload can resume expansion-gate decisions;
    /// see DESIGN.md).
    pub fn snapshot_parts(&self) -> (i32, Vec<f32>, Vec<f32>, u64) {
        match self {
            ServerEntry::Scalar {
                w0,
                aux,
                feature_count,
            } => (1, vec![*w0], vec![aux.cg, aux.z_or_t], *feature_count),
            ServerEntry::Expanded {
                w0,
                embedding,
                aux,
                embedding_cg,
                feature_count,
            } => {
                let mut weights = Vec::with_capacity(1 + embedding.len());
                weights.push(*w0);
                weights.extend_from_slice(embedding);
                let mut auxv = vec![aux.cg, aux.z_or_t];
                auxv.extend_from_slice(embedding_cg);
                (weights.len() as i32, weights, auxv, *feature_count)
            }
        }
    }

    /// Reconstructs an entry from its snapshot parts.
    pub fn from_snapshot_parts(size: i32, weights: &[f32], aux: &[f32], feature_count: u64) -> Self {
        if size == 1 {
            ServerEntry::Scalar {
                w0: weights[0],
                aux: ScalarAux {
                    cg: aux[0],
                    z_or_t: aux[1],
                },
                feature_count,
            }
        } else {
            let d = (size - 1) as usize;
            ServerEntry::Expanded {
                w0: weights[0],
                embedding: weights[1..1 + d].to_vec().into_boxed_slice(),
                aux: ScalarAux {
                    cg: aux[0],
                    z_or_t: aux[1],
                },
                embedding_cg: aux[2..2 + d].to_vec().into_boxed_slice(),
                feature_count,
            }
        }
    }
}

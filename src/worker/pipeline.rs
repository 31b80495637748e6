//! The worker-side minibatch pipeline: streaming read → localize → (push
//! count) → pull weights → evaluate → push gradient. Concurrency is bounded
//! by a `tokio::sync::Semaphore` sized to `max_concurrent`, the
//! design-note-recommended stand-in for the source's chained transport
//! callbacks (spec.md §9): each minibatch is an async task holding one
//! permit from READING until DONE.

use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::config::{EmbeddingConfig, WorkerConfig};
use crate::data::{FeaId, RowBlock};
use crate::error::{Result, TrainerError};
use crate::fileio::ShardReader;
use crate::localize::{localize, KeyTransform};
use crate::loss::{evaluation, fm_backward, fm_forward, write_predictions, Loss};
use crate::progress::Progress;
use crate::transport::{KvTransport, PullOpts, PushCommand, PushOpts};

/// Mirrors spec.md §4.5's states; used only to label tracing spans, since
/// the actual control flow is a linear `async fn` rather than a polled
/// state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MinibatchState {
    Reading,
    Localized,
    PushCountPending,
    PullWeightPending,
    Evaluating,
    PushGradPending,
    Predicting,
    Done,
}

/// Selects between the training path (push-count/pull/evaluate/push-grad)
/// and the prediction path (pull/evaluate/write predictions), per spec.md
/// §4.5: prediction mode skips both push-count and push-gradient.
#[derive(Clone)]
pub enum PipelineMode {
    Train,
    Predict {
        probability: bool,
        sink: Arc<Mutex<dyn std::io::Write + Send>>,
    },
}

/// Drives one data pass (one full scan of `reader`) to completion and
/// returns the merged progress delta. `pass_index == 0` is the only pass
/// that sends push-count RPCs, and only in `PipelineMode::Train`, per
/// spec.md §9.
pub async fn run_data_pass(
    reader: &mut dyn ShardReader,
    transport: Arc<dyn KvTransport>,
    worker_cfg: WorkerConfig,
    embedding_cfg: EmbeddingConfig,
    pool: Arc<rayon::ThreadPool>,
    pass_index: usize,
    mode: PipelineMode,
) -> Result<Progress> {
    let loss: Arc<dyn Loss> = Arc::from(crate::loss::make_loss(worker_cfg.objective));
    let semaphore = Arc::new(tokio::sync::Semaphore::new(worker_cfg.max_concurrent.max(1)));
    let mut handles = Vec::new();

    loop {
        let state = MinibatchState::Reading;
        trace!(?state, "reading next minibatch");
        let block = match reader.next_batch(worker_cfg.minibatch_size)? {
            Some(b) => b,
            None => break,
        };
        if block.is_empty() {
            continue;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TrainerError::Transport(format!("semaphore closed: {e}")))?;
        crate::monitoring::metrics::MINIBATCHES_IN_FLIGHT
            .with_label_values(&[PIPELINE_METRIC_LABEL])
            .inc();

        let transport = transport.clone();
        let pool = pool.clone();
        let loss = loss.clone();
        let embedding_cfg = embedding_cfg.clone();
        let worker_cfg = worker_cfg.clone();
        let mode = mode.clone();

        let handle = tokio::spawn(async move {
            let result = process_minibatch(
                block,
                transport.as_ref(),
                &worker_cfg,
                &embedding_cfg,
                &pool,
                pass_index,
                loss.as_ref(),
                &mode,
            )
            .await;
            drop(permit);
            crate::monitoring::metrics::MINIBATCHES_IN_FLIGHT
                .with_label_values(&[PIPELINE_METRIC_LABEL])
                .dec();
            result
        });
        handles.push(handle);
    }

    let mut total = Progress::zero();
    for handle in handles {
        let progress = handle
            .await
            .map_err(|e| TrainerError::Transport(format!("minibatch task panicked: {e}")))??;
        total = total.merge(&progress);
    }
    crate::monitoring::metrics::OBJECTIVE_GAUGE
        .with_label_values(&[PIPELINE_METRIC_LABEL])
        .set(total.objective);
    if let Some(auc) = total.auc() {
        crate::monitoring::metrics::AUC_GAUGE
            .with_label_values(&[PIPELINE_METRIC_LABEL])
            .set(auc);
    }
    Ok(total)
}

/// Default `worker` label for the process-wide gauges in
/// `monitoring::metrics`; a multi-worker-per-process deployment would
/// thread a real worker ID through here instead.
const PIPELINE_METRIC_LABEL: &str = "default";

async fn process_minibatch(
    block: RowBlock<FeaId>,
    transport: &dyn KvTransport,
    worker_cfg: &WorkerConfig,
    embedding_cfg: &EmbeddingConfig,
    pool: &rayon::ThreadPool,
    pass_index: usize,
    loss: &dyn Loss,
    mode: &PipelineMode,
) -> Result<Progress> {
    let (local, counts) = localize(&block, KeyTransform::Verbatim, pool)?;
    debug!(state = ?MinibatchState::Localized, unique = local.num_unique(), "localized minibatch");

    let embeddings_enabled = embedding_cfg.enabled();
    let is_train = matches!(mode, PipelineMode::Train);

    if is_train && pass_index == 0 && embeddings_enabled {
        trace!(state = ?MinibatchState::PushCountPending, "sending push-count");
        let payload: Vec<f32> = counts.iter().map(|&c| c as f32).collect();
        let lengths = vec![1u32; local.dictionary.len()];
        let opts = PushOpts {
            command: PushCommand::Count,
            ..Default::default()
        };
        transport
            .push(&local.dictionary, &payload, &lengths, &opts)
            .await?;
    }

    trace!(state = ?MinibatchState::PullWeightPending, "pulling weights");
    let (payload, lengths) = transport.pull(&local.dictionary, &PullOpts::default()).await?;

    let u = local.num_unique();
    let d = embedding_cfg.dim;
    let mut w = vec![0f32; u];
    let mut v = if embeddings_enabled { Some(vec![0f32; u * d]) } else { None };

    let mut offset = 0usize;
    for (j, &len) in lengths.iter().enumerate() {
        let slice = &payload[offset..offset + len as usize];
        offset += len as usize;
        w[j] = slice[0];
        if len as usize > 1 {
            if let Some(v) = v.as_mut() {
                let take = d.min(slice.len().saturating_sub(1));
                v[j * d..j * d + take].copy_from_slice(&slice[1..1 + take]);
            }
        }
    }

    debug!(state = ?MinibatchState::Evaluating, "evaluating objective and gradient");
    let v_ref = v.as_deref().map(|slice| (slice, d));
    let fwd = fm_forward(&local.block, &w, v_ref, pool)?;

    let labels = &local.block.labels;

    if let PipelineMode::Predict { probability, sink } = mode {
        trace!(state = ?MinibatchState::Predicting, "writing predictions");
        let predictions = loss.predict(&fwd.s, *probability);
        let mut sink = sink
            .lock()
            .map_err(|_| TrainerError::Transport("prediction sink lock poisoned".into()))?;
        write_predictions(&predictions, &mut *sink)?;
        debug!(state = ?MinibatchState::Done, "minibatch complete");
        return Ok(Progress {
            examples: fwd.s.len() as u64,
            ..Progress::zero()
        });
    }

    let objective = loss.forward(&fwd.s, labels)?;
    let mut p = loss.backward(&fwd.s, labels);
    for pi in p.iter_mut() {
        if pi.is_nan() {
            return Err(TrainerError::Numeric("NaN in dual vector p".into()));
        }
    }

    let bwd = fm_backward(&local.block, &p, v_ref, u, pool);

    let mut grad_v = bwd.grad_v;
    if let Some(grad_v) = grad_v.as_mut() {
        let postprocess = crate::loss::GradPostprocess {
            clip: worker_cfg.grad_clip,
            dropout_rate: worker_cfg.grad_dropout,
            normalize: worker_cfg.grad_normalize,
        };
        let mut rng = rand::thread_rng();
        postprocess.apply(grad_v, d, &mut rng);
    }

    trace!(state = ?MinibatchState::PushGradPending, "pushing gradient");
    let mut grad_payload = Vec::with_capacity(u * (1 + d));
    let mut grad_lengths = Vec::with_capacity(u);
    for j in 0..u {
        let had_embedding = lengths[j] as usize > 1;
        grad_payload.push(bwd.grad_w[j]);
        if had_embedding {
            if let Some(gv) = &grad_v {
                grad_payload.extend_from_slice(&gv[j * d..j * d + d]);
                grad_lengths.push((1 + d) as u32);
                continue;
            }
        }
        grad_lengths.push(1);
    }
    let opts = PushOpts {
        command: PushCommand::Gradient,
        ..Default::default()
    };
    transport
        .push(&local.dictionary, &grad_payload, &grad_lengths, &opts)
        .await?;

    debug!(state = ?MinibatchState::Done, "minibatch complete");

    Ok(evaluation::evaluate(&fwd.s, labels, objective))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ObjectiveKind, ServerConfig};
    use crate::data::Row;
    use crate::localize::make_pool;
    use crate::transport::local::LocalCluster;

    #[tokio::test]
    async fn one_pass_over_two_minibatches_updates_progress() {
        struct FixedReader {
            batches: Vec<Vec<Row>>,
        }
        impl ShardReader for FixedReader {
            fn next_batch(&mut self, _batch_size: usize) -> Result<Option<RowBlock<FeaId>>> {
                if self.batches.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(RowBlock::from_rows(&self.batches.remove(0))))
                }
            }
        }

        let mut reader = FixedReader {
            batches: vec![
                vec![Row::new(1.0, vec![1, 2]), Row::new(-1.0, vec![2, 3])],
                vec![Row::new(1.0, vec![1])],
            ],
        };

        let server_cfg = ServerConfig::default();
        let cluster = LocalCluster::new(1, &server_cfg);
        let pool = Arc::new(make_pool(2).unwrap());
        let mut worker_cfg = WorkerConfig::default();
        worker_cfg.objective = ObjectiveKind::Logistic;
        worker_cfg.minibatch_size = 2;

        let progress = run_data_pass(
            &mut reader,
            cluster,
            worker_cfg,
            EmbeddingConfig::default(),
            pool,
            0,
            PipelineMode::Train,
        )
        .await
        .unwrap();

        assert_eq!(progress.examples, 3);
    }

    #[tokio::test]
    async fn empty_part_yields_zero_progress() {
        struct EmptyReader;
        impl ShardReader for EmptyReader {
            fn next_batch(&mut self, _batch_size: usize) -> Result<Option<RowBlock<FeaId>>> {
                Ok(None)
            }
        }
        let mut reader = EmptyReader;
        let cluster = LocalCluster::new(1, &ServerConfig::default());
        let pool = Arc::new(make_pool(1).unwrap());
        let progress = run_data_pass(
            &mut reader,
            cluster,
            WorkerConfig::default(),
            EmbeddingConfig::default(),
            pool,
            0,
            PipelineMode::Train,
        )
        .await
        .unwrap();
        assert_eq!(progress, Progress::zero());
    }

    #[tokio::test]
    async fn predict_mode_writes_one_line_per_row_and_skips_push_gradient() {
        struct FixedReader {
            batches: Vec<Vec<Row>>,
        }
        impl ShardReader for FixedReader {
            fn next_batch(&mut self, _batch_size: usize) -> Result<Option<RowBlock<FeaId>>> {
                if self.batches.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(RowBlock::from_rows(&self.batches.remove(0))))
                }
            }
        }

        let mut reader = FixedReader {
            batches: vec![vec![Row::new(1.0, vec![1, 2]), Row::new(-1.0, vec![2, 3])]],
        };

        let server_cfg = ServerConfig::default();
        let cluster = LocalCluster::new(1, &server_cfg);
        let pool = Arc::new(make_pool(1).unwrap());
        let worker_cfg = WorkerConfig::default();

        let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<Mutex<dyn std::io::Write + Send>> = buf.clone();
        let mode = PipelineMode::Predict {
            probability: true,
            sink,
        };

        let progress = run_data_pass(
            &mut reader,
            cluster,
            worker_cfg,
            EmbeddingConfig::default(),
            pool,
            0,
            mode,
        )
        .await
        .unwrap();

        assert_eq!(progress.examples, 2);
        assert_eq!(progress.objective, 0.0);

        let written = buf.lock().unwrap();
        let lines: Vec<&str> = std::str::from_utf8(&written).unwrap().lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let p: f32 = line.parse().unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }
}

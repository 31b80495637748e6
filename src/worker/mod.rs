pub mod pipeline;

pub use pipeline::{run_data_pass, PipelineMode};

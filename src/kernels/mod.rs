pub mod spmm;
pub mod spmv;

pub use spmm::{spmm_times, spmm_trans_times_plus};
pub use spmv::{spmv_times, spmv_trans_times};

pub mod entities;
pub mod histogram;
pub mod job;

pub use entities::*;
pub use histogram::{Histogram, HistogramError};
pub use job::*;

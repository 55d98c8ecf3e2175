pub mod scheduler;

pub use scheduler::{plan, SampleStrategy, SamplingPlan};

//! Cross-pass scenario tests over the full pipeline.

mod helpers;
mod pipeline_runs;
mod ssa_e2e;

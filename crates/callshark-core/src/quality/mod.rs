//! Per-window metrics, the scoring model and the scorer task.

pub mod metrics;
pub mod score;
mod scorer;

pub use score::{ScoringWeights, calculate_quality};
pub use scorer::{FlowMetrics, FlowScore, QualityHistory, Scoreboard};
pub(crate) use scorer::{Scorer, ScorerOutput};

//! Research Orchestrator (C6): Plan → Research → Synthesize pipeline over
//! the LLM Gateway Client.

pub mod budget;
pub mod plan;
pub mod progress;
pub mod runner;
pub mod types;

pub use progress::{NullProgressSink, ProgressSink};
pub use runner::ResearchOrchestrator;
pub use types::{OrchestratorOutcome, ResearchRequest, SubQueryOutcome};

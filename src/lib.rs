pub mod dataset;
pub mod infer;
pub mod llm;
pub mod prompt;
pub mod scenario;
pub mod train;

pub use llm::{FineTuneConfig, GenerationConfig, LoraConfig};
pub use scenario::{LabeledScenario, Scenario};

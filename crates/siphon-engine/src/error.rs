use siphon_config::ConfigError;
use siphon_core::TaskId;
use siphon_scheduler::SubmitError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn engine threads: {0}")]
    Spawn(#[from] std::io::Error),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("{0} has not finished")]
    NotFinished(TaskId),
}

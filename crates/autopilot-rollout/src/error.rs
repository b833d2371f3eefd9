use thiserror::Error;

use autopilot_core::DeploymentStrategy;
use autopilot_state::StateError;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("deployment strategy not supported: {0}")]
    UnsupportedStrategy(DeploymentStrategy),

    #[error("service {service} already has an active deployment: {id}")]
    AlreadyInProgress { service: String, id: String },

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("deployment {0} already finished")]
    AlreadyFinished(String),

    #[error(transparent)]
    State(#[from] StateError),
}

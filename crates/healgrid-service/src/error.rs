use healgrid_actions::ActionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("self-healing service is shutting down")]
    ShuttingDown,
}

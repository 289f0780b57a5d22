//! CLI output: error mapping from domain errors to the CLI surface.

use crate::error::{EngineError, FactorError};

/// Message printed for a failed command.
pub fn map_error(e: &FactorError) -> String {
    match e {
        FactorError::UnknownFactor(_) => {
            format!("{}\n\nUse 'factorbox factors list' to see available factors.", e)
        }
        FactorError::Engine(EngineError::Transport(_)) => {
            format!("{}\n\nIs the container engine reachable? Check engine.endpoint or DOCKER_HOST.", e)
        }
        _ => e.to_string(),
    }
}

/// Process exit code for a failed command. Timeouts use 124 like timeout(1)
/// and Ctrl-C uses 130; runtime failures forward the container's status when
/// it fits.
pub fn exit_code(e: &FactorError) -> i32 {
    match e {
        FactorError::Timeout { .. } => 124,
        FactorError::RuntimeFailure {
            exit_code: Some(code),
            ..
        } if (1..=255).contains(code) => *code as i32,
        FactorError::InvalidArguments(_) => 2,
        FactorError::Interrupted => 130,
        _ => 1,
    }
}

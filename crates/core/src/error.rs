use std::fmt;

use thiserror::Error;

/// Which half of a load a queued item belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// CPU-only work, runs on the resource worker thread.
    Decode,
    /// GPU work, runs on the thread owning the rendering context.
    Materialize,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseKind::Decode => f.write_str("decode"),
            PhaseKind::Materialize => f.write_str("materialize"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The builder names no source the factory can key a resource on.
    #[error("{factory} builder has no source to load from")]
    MissingLocator { factory: &'static str },

    #[error("no registered processor accepts {0} phases")]
    NoProcessor(PhaseKind),

    #[error("built-in {0} processor is not registered")]
    MissingBuiltin(PhaseKind),

    #[error("processor '{0}' is already registered")]
    DuplicateProcessor(String),

    #[error("pipeline has been disposed")]
    Disposed,

    #[error("failed to spawn resource worker '{name}'")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Fatal errors mean the pipeline can no longer make progress and the
    /// engine should shut down rather than keep requesting.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::MissingLocator { .. })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_locator_errors_are_recoverable() {
        assert!(!PipelineError::MissingLocator { factory: "texture" }.is_fatal());
        assert!(PipelineError::NoProcessor(PhaseKind::Decode).is_fatal());
        assert!(PipelineError::Disposed.is_fatal());
    }

    #[test]
    fn messages_name_the_phase() {
        let msg = PipelineError::MissingBuiltin(PhaseKind::Materialize).to_string();
        assert_eq!(msg, "built-in materialize processor is not registered");
    }
}

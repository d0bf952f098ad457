use thiserror::Error;

/// Errors surfaced by [`crate::Table`] operations.
///
/// `AlreadyGrowing` is an internal signal between the load-factor check and
/// the grow path; callers never see it, it is downgraded to "skip growing
/// this round" before returning, so there is no variant for it here.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("key not found")]
    NotFound,

    #[error("table has reached its maximal capacity")]
    NoSpaceLeft,

    #[error("growth is forbidden on this table")]
    ForbiddenToGrow,

    #[error("condition rejected the matched value")]
    ConditionFailed,
}

use crate::pool::{PoolId, TokenId};
use fixed_math::FixedMathError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolMathError {
    /// A quote would be mispriced if this were swallowed; always fatal.
    #[error("invariant solver did not converge after {iterations} iterations")]
    NonConvergence { iterations: u32 },
    #[error(transparent)]
    Fixed(#[from] FixedMathError),
    #[error("pool {pool} does not support the requested pair")]
    UnsupportedPair { pool: PoolId },
    #[error("token {token} is not traded by pool {pool}")]
    UnknownToken { token: TokenId, pool: PoolId },
    #[error("malformed pool {pool}: {reason}")]
    MalformedPool { pool: PoolId, reason: String },
    /// The requested amount is outside the numerically valid region.
    #[error("amount exceeds the usable reserves")]
    ExceedsReserves,
}

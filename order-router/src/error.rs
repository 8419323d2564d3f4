use pool_math::{PoolId, PoolMathError, TokenId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("paths longer than two hops are unsupported")]
    TooManyHops,
    #[error("path legs do not connect")]
    DisconnectedPath,
    #[error("pool {0} is not in the snapshot")]
    UnknownPool(PoolId),
    #[error("token {0} is not traded by any pool")]
    UnknownToken(TokenId),
    #[error(transparent)]
    Math(#[from] PoolMathError),
}

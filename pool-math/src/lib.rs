//! Pool pricing models.
//!
//! One pricing capability ([`PricingModel`]) over a closed set of pool
//! families: constant-weighted-product, stable-swap and the symmetric
//! three-asset pool. Each family is priced through a directional pair view
//! built from an immutable pool snapshot; the compiler enforces exhaustive
//! handling of every (family × pair shape) combination through the
//! [`PoolPair`] tagged variant.

pub mod error;
pub mod gyro3;
pub mod pair;
pub mod pool;
pub mod stable;
pub mod weighted;

pub use error::PoolMathError;
pub use gyro3::Gyro3Pair;
pub use pair::{PairShape, PoolPair, PricingModel, SwapKind};
pub use pool::{downscale_down, downscale_up, upscale, Pool, PoolId, PoolParams, PoolToken, TokenId};
pub use stable::StablePair;
pub use weighted::WeightedPair;

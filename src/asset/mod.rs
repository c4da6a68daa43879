//! Asset resolution module
//!
//! Instruments listed on an exchange and a memoizing symbol/sid cache in
//! front of the exchange's resolver

mod cache;
mod types;

pub use cache::SymbolCache;
pub use types::{Asset, AssetError, Sid};

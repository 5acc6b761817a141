//! Pairwise statistics over every variant pair of a store.

pub mod balancer;
pub mod calc;
pub mod ld;

pub use balancer::{BlockPair, LoadBalancer, WorkList};
pub use calc::{CalcError, CalcSummary, Calculator};
pub use ld::{LdHelper, PairTable};

pub mod error;
mod pool;
mod router;

pub use error::{PoolError, Rejected};
pub use pool::{BoxFuture, OverflowPolicy, PoolConfig, ProcessingPool, Processor};
pub use router::{HashRouter, Routable, Router};

//! Security primitives shared by the ingress and the stores.
pub mod hash;
pub mod signature;
pub mod vault;

pub use hash::*;
pub use signature::*;
pub use vault::*;

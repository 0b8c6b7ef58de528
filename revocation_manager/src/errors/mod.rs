pub mod error;

pub use error::{RevocationError, RevocationResult};

//! The core control plane for an elastic distributed-training job master:
//! the Node Manager and the Job Auto-Scaler.
#[macro_use]
extern crate serde_derive;

pub mod args;
pub mod conf;
pub mod error;
pub mod libs;
#[cfg(feature = "test-utilities")]
pub mod test_utilities;

pub use conf::Conf;
pub use error::Error;

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod scheduler;
pub mod timeout;

pub use clock::*;
pub use config::*;
pub use domain::*;
pub use error::*;
pub use scheduler::PeriodicTask;
pub use timeout::{with_timeout, TimeoutError};

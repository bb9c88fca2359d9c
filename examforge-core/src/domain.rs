pub mod answer;
pub mod context;
pub mod ids;
pub mod question;
pub mod region;
pub mod session;

pub use answer::*;
pub use context::*;
pub use ids::*;
pub use question::*;
pub use region::*;
pub use session::*;

pub mod ids;
pub mod resample;
pub mod sample;
pub mod session;
pub mod wire;

pub use ids::{ClientId, SessionId};
pub use sample::Sample;
pub use session::SessionStatus;

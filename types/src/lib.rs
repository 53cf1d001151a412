pub mod audio;
pub mod chat;
pub mod session;
mod banner;

pub use banner::CrisisBanner;
pub use chat::{Reply, TextTurnRequest};
pub use session::SessionId;

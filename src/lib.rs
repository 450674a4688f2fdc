pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod reconciler;
pub mod relay;
pub mod session;
pub mod settings_store;
pub mod store;
pub mod transport;

pub use config::SessionSettings;
pub use error::{SessionError, SessionErrorKind, SessionResult};
pub use session::{CaptureFeed, Session, SessionSummary};

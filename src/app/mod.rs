pub mod error;
pub mod settings;
pub mod state;

pub use error::GatewayError;
pub use settings::{DriveSettings, GatewaySettings, LockPolicy, ToolSettings};
pub use state::AppState;

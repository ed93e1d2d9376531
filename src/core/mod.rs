// Public modules
pub mod connection;
pub mod defaults;
pub mod delivery;
pub mod error;
pub mod executor;
pub mod installer;
pub mod options;
pub mod recorder;
pub mod role;
pub mod sequencer;
pub mod ssh;
pub mod step;
pub mod transfer;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use connection::{Connection, ConnectionManager};
pub use delivery::{Delivery, DeliveryConfig};
pub use error::{Error, ErrorCode, Result};
pub use executor::CommandOutcome;
pub use installer::{Installer, Sequence, Verification, Verifier};
pub use options::{ConnectionOptions, SessionKey};
pub use recorder::{ExecutionRecord, ExecutionRecorder, OutputStream};
pub use role::RoleRegistry;
pub use sequencer::CommandSequencer;
pub use step::{CommandStep, TransferSpec};

//! Meeting-recorder session lifecycle.

pub mod controller;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod service;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{SessionBackends, SessionController, SessionSettings, ALONE_REASON};
pub use error::{SessionError, SessionResult};
pub use monitor::{MonitorExit, MonitorSettings, PresenceMonitor};
pub use registry::SessionRegistry;
pub use service::SessionService;
pub use state::{SessionId, SessionPhase, SessionRecord, SessionStatusHandle, StopTransition};

//! The public session surface and its authorization check.

pub mod facade;
pub mod permission;

pub use facade::{RealtimeSession, RecordingCapabilities, SessionError};
pub use permission::{
    AudioAuthorization, AuthorizationStatus, FixedAuthorization, InputDeviceAuthorization,
};

pub use crate::transport::SessionStatus;

//! Microphone authorization, checked before any negotiation starts.

use crate::audio::has_default_input_device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

impl AuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        self == AuthorizationStatus::Authorized
    }
}

/// Answers "may this process capture audio right now?".
pub trait AudioAuthorization: Send + Sync {
    fn status(&self) -> AuthorizationStatus;
}

/// Treats a reachable default input device as authorization.  Desktop
/// hosts without a permission prompt either expose the device or fail to
/// open it.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputDeviceAuthorization;

impl AudioAuthorization for InputDeviceAuthorization {
    fn status(&self) -> AuthorizationStatus {
        if has_default_input_device() {
            AuthorizationStatus::Authorized
        } else {
            log::warn!("permission: no default input device available");
            AuthorizationStatus::Denied
        }
    }
}

/// A status decided elsewhere, e.g. by a host application's own prompt.
#[derive(Debug, Clone, Copy)]
pub struct FixedAuthorization(pub AuthorizationStatus);

impl AudioAuthorization for FixedAuthorization {
    fn status(&self) -> AuthorizationStatus {
        self.0
    }
}

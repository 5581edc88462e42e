//! Offer/answer negotiation against the signaling endpoint.
//!
//! ```text
//! create_offer ─▶ set_local_description ─▶ POST offer ─▶ classify ─▶ set_remote_description
//!  OfferCreation    LocalDescription        Request      BadServer /   RemoteDescription
//!  Failed           Failed                              InvalidCredential  Failed
//! ```
//!
//! A coordinator negotiates once.  Calls made while a negotiation is in
//! flight, or after one succeeded, return `Ok(None)` and touch nothing.  A
//! failed (or dropped) negotiation returns the coordinator to idle.
//!
//! The caller passes the transport's closed signal.  Once it flips, the
//! exchange is dropped at its current await point and no further step runs.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;

use crate::lock;
use crate::transport::{EngineError, OfferConstraints, PeerEngine, SessionDescription};

use super::client::{SignalingClient, SignalingRequest, SignalingResponse};

// ---------------------------------------------------------------------------
// NegotiationError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("failed to create offer: {0}")]
    OfferCreationFailed(#[source] EngineError),

    #[error("failed to apply local description: {0}")]
    LocalDescriptionFailed(#[source] EngineError),

    #[error("failed to apply remote description: {0}")]
    RemoteDescriptionFailed(#[source] EngineError),

    /// Any status other than 201/401, or a 201 without a body.
    #[error("unexpected signaling response (HTTP {status})")]
    BadServerResponse { status: u16, body: String },

    /// The endpoint answered 401.
    #[error("signaling endpoint rejected the credentials")]
    InvalidCredential,

    /// The HTTP exchange itself failed (connection, timeout).
    #[error("signaling request failed: {0}")]
    Request(String),

    /// The transport closed before the exchange finished.
    #[error("negotiation cancelled: transport closed")]
    Cancelled,
}

/// Map a signaling response to the remote description or a typed failure.
pub fn classify_response(response: SignalingResponse) -> Result<SessionDescription, NegotiationError> {
    match response.status {
        201 if !response.body.trim().is_empty() => Ok(SessionDescription::answer(response.body)),
        401 => Err(NegotiationError::InvalidCredential),
        status => Err(NegotiationError::BadServerResponse {
            status,
            body: response.body,
        }),
    }
}

// ---------------------------------------------------------------------------
// HandshakeCoordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Idle,
    Negotiating,
    Complete,
}

pub struct HandshakeCoordinator {
    signaling: Arc<dyn SignalingClient>,
    phase: Arc<Mutex<HandshakePhase>>,
}

/// Puts the phase back to `Idle` unless the negotiation completed.
struct PhaseGuard {
    phase: Arc<Mutex<HandshakePhase>>,
    completed: bool,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let mut phase = lock(&self.phase);
        *phase = if self.completed {
            HandshakePhase::Complete
        } else {
            HandshakePhase::Idle
        };
    }
}

impl HandshakeCoordinator {
    pub fn new(signaling: Arc<dyn SignalingClient>) -> Self {
        Self {
            signaling,
            phase: Arc::new(Mutex::new(HandshakePhase::Idle)),
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        *lock(&self.phase)
    }

    /// Run the offer/answer exchange on `engine`, abandoning it with
    /// [`NegotiationError::Cancelled`] as soon as `closed` reads `true`.
    ///
    /// Returns the applied remote description, or `None` when another
    /// negotiation is in flight or already succeeded.
    pub async fn negotiate(
        &self,
        engine: &dyn PeerEngine,
        request: &SignalingRequest,
        closed: watch::Receiver<bool>,
    ) -> Result<Option<SessionDescription>, NegotiationError> {
        let mut guard = {
            let mut phase = lock(&self.phase);
            if *phase != HandshakePhase::Idle {
                log::debug!("handshake: already {:?}, ignoring", *phase);
                return Ok(None);
            }
            *phase = HandshakePhase::Negotiating;
            PhaseGuard {
                phase: Arc::clone(&self.phase),
                completed: false,
            }
        };

        let answer = tokio::select! {
            biased;
            _ = wait_closed(closed) => {
                log::info!("handshake: transport closed, abandoning negotiation");
                return Err(NegotiationError::Cancelled);
            }
            result = self.exchange(engine, request) => result?,
        };

        guard.completed = true;
        log::info!("handshake: remote description applied");
        Ok(Some(answer))
    }

    async fn exchange(
        &self,
        engine: &dyn PeerEngine,
        request: &SignalingRequest,
    ) -> Result<SessionDescription, NegotiationError> {
        let offer = engine
            .create_offer(&OfferConstraints::default())
            .await
            .map_err(NegotiationError::OfferCreationFailed)?;

        engine
            .set_local_description(offer.clone())
            .await
            .map_err(NegotiationError::LocalDescriptionFailed)?;

        log::info!("handshake: posting offer to {}", request.url);
        let response = self.signaling.post_offer(request, &offer.sdp).await?;

        let answer = classify_response(response).map_err(|e| {
            log::warn!("handshake: {e}");
            e
        })?;

        engine
            .set_remote_description(answer.clone())
            .await
            .map_err(NegotiationError::RemoteDescriptionFailed)?;

        Ok(answer)
    }
}

/// Resolves once `signal` reads `true`.  A dropped sender can never close
/// the transport, so that case never resolves.
async fn wait_closed(mut signal: watch::Receiver<bool>) {
    let sender_dropped = signal.wait_for(|closed| *closed).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Session gateway
//!
//! Binds a transport connection to one booking and one party role. This is
//! the only place roles are derived from credentials; everything past `bind`
//! trusts the resulting `Binding`.

use crate::hub::{NotificationHub, Outbound};
use counsel_core::models::{BindRejection, Binding, Channel, PartyRole};
use counsel_core::traits::{BookingRepository, CredentialVerifier};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub struct SessionGateway {
    verifier: Arc<dyn CredentialVerifier>,
    bookings: Arc<dyn BookingRepository>,
    hub: Arc<NotificationHub>,
}

impl SessionGateway {
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        bookings: Arc<dyn BookingRepository>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            verifier,
            bookings,
            hub,
        }
    }

    /// Authenticate a connection and resolve its role on the booking
    #[instrument(skip(self, credential))]
    pub async fn bind(
        &self,
        credential: Option<&str>,
        booking_id: i64,
        channel: Channel,
    ) -> Result<Binding, BindRejection> {
        let token = match credential.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(BindRejection::MissingCredential),
        };

        let identity = self.verifier.verify(token).map_err(|e| {
            debug!("Credential rejected: {}", e);
            BindRejection::InvalidCredential
        })?;

        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await
            .map_err(|e| {
                error!("Booking lookup failed: {}", e);
                BindRejection::StoreUnavailable
            })?
            .ok_or(BindRejection::UnknownBooking)?;

        let role = booking
            .party_role(identity.account_id)
            .ok_or(BindRejection::NotAParty)?;

        if channel == Channel::Counsellor && role != PartyRole::Counsellor {
            return Err(BindRejection::RoleMismatch);
        }

        let binding = Binding::new(booking_id, role, identity.account_id);
        info!(
            connection_id = %binding.connection_id,
            account_id = binding.account_id,
            role = %binding.role,
            "Connection bound"
        );
        Ok(binding)
    }

    /// Register a bound connection with the hub, including catch-up
    pub async fn connect(&self, binding: &Binding) -> Result<Outbound, BindRejection> {
        self.hub.join(binding).await.map_err(|e| {
            error!(booking_id = binding.booking_id, "Hub join failed: {}", e);
            BindRejection::StoreUnavailable
        })
    }

    pub async fn disconnect(&self, binding: &Binding) {
        self.hub.leave(binding.booking_id, binding.connection_id).await;
    }
}

use uuid::Uuid;

use crate::disable::{DisableReason, DisableRegistry, static_message};

/// Reasons a SAS host link can take the machine out of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum SasDisableState {
    /// No reason.
    None = 0,
    /// Host 0 sent a disable long poll.
    DisabledByHost0 = 1 << 0,
    /// Host 1 sent a disable long poll.
    DisabledByHost1 = 1 << 1,
    /// Host 0 stopped polling.
    Host0CommunicationsOffline = 1 << 2,
    /// Host 1 stopped polling.
    Host1CommunicationsOffline = 1 << 3,
    /// Host 0 disabled the machine at power up.
    PowerUpDisabledByHost0 = 1 << 4,
    /// Host 1 disabled the machine at power up.
    PowerUpDisabledByHost1 = 1 << 5,
    /// Validation is configured but no validation id was received.
    ValidationIdNeeded = 1 << 6,
    /// The progressive host stopped responding.
    ProgressiveHostDisabled = 1 << 7,
    /// The validation queue is full.
    ValidationQueueFull = 1 << 8,
}

impl DisableReason for SasDisableState {
    fn bits(self) -> u64 {
        self as u64
    }
}

impl SasDisableState {
    /// Every non-zero reason.
    pub const ALL: [SasDisableState; 9] = [
        SasDisableState::DisabledByHost0,
        SasDisableState::DisabledByHost1,
        SasDisableState::Host0CommunicationsOffline,
        SasDisableState::Host1CommunicationsOffline,
        SasDisableState::PowerUpDisabledByHost0,
        SasDisableState::PowerUpDisabledByHost1,
        SasDisableState::ValidationIdNeeded,
        SasDisableState::ProgressiveHostDisabled,
        SasDisableState::ValidationQueueFull,
    ];

    /// Stable correlation id used with the system disable sink.
    pub const fn id(self) -> Uuid {
        match self {
            SasDisableState::None => Uuid::nil(),
            SasDisableState::DisabledByHost0 => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0001)
            }
            SasDisableState::DisabledByHost1 => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0002)
            }
            SasDisableState::Host0CommunicationsOffline => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0003)
            }
            SasDisableState::Host1CommunicationsOffline => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0004)
            }
            SasDisableState::PowerUpDisabledByHost0 => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0005)
            }
            SasDisableState::PowerUpDisabledByHost1 => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0006)
            }
            SasDisableState::ValidationIdNeeded => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0007)
            }
            SasDisableState::ProgressiveHostDisabled => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0008)
            }
            SasDisableState::ValidationQueueFull => {
                Uuid::from_u128(0x6fa2_1c3e_9b44_4d0a_8e51_0a5c_0000_0009)
            }
        }
    }

    /// Operator-facing text.
    pub const fn message(self) -> &'static str {
        match self {
            SasDisableState::None => "",
            SasDisableState::DisabledByHost0 => "Disabled by SAS host 1",
            SasDisableState::DisabledByHost1 => "Disabled by SAS host 2",
            SasDisableState::Host0CommunicationsOffline => "SAS host 1 communications offline",
            SasDisableState::Host1CommunicationsOffline => "SAS host 2 communications offline",
            SasDisableState::PowerUpDisabledByHost0 => "Disabled at power up by SAS host 1",
            SasDisableState::PowerUpDisabledByHost1 => "Disabled at power up by SAS host 2",
            SasDisableState::ValidationIdNeeded => "Waiting for SAS validation id",
            SasDisableState::ProgressiveHostDisabled => "SAS progressive host disconnected",
            SasDisableState::ValidationQueueFull => "SAS validation queue full",
        }
    }

    /// Registry covering [`ALL`](Self::ALL).
    pub fn registry() -> DisableRegistry<SasDisableState> {
        Self::ALL
            .into_iter()
            .fold(DisableRegistry::new(), |registry, reason| {
                registry.with(reason, reason.id(), static_message(reason.message()))
            })
    }
}

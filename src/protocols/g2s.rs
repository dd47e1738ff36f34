use uuid::Uuid;

use crate::disable::{DisableReason, DisableRegistry, static_message};

/// Reasons a G2S host can take the machine out of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum G2sDisableState {
    /// No reason.
    None = 0,
    /// The host disabled the cabinet device.
    DisabledByHost = 1 << 0,
    /// The host has not opened communications.
    CommsOffline = 1 << 1,
    /// A host-negotiated configuration change is in progress.
    ConfigurationChange = 1 << 2,
    /// The G2S transport is down.
    TransportDisabled = 1 << 3,
    /// The host requires the machine to stay disabled while it is offline.
    HostOfflineLockup = 1 << 4,
}

impl DisableReason for G2sDisableState {
    fn bits(self) -> u64 {
        self as u64
    }
}

impl G2sDisableState {
    /// Every non-zero reason.
    pub const ALL: [G2sDisableState; 5] = [
        G2sDisableState::DisabledByHost,
        G2sDisableState::CommsOffline,
        G2sDisableState::ConfigurationChange,
        G2sDisableState::TransportDisabled,
        G2sDisableState::HostOfflineLockup,
    ];

    /// Stable correlation id used with the system disable sink.
    pub const fn id(self) -> Uuid {
        Uuid::from_u128(0x2d0b_7f10_43c6_4b8e_a7d2_5e17_0000_0000 | self as u128)
    }

    /// Registry covering [`ALL`](Self::ALL).
    pub fn registry() -> DisableRegistry<G2sDisableState> {
        DisableRegistry::new()
            .with(
                G2sDisableState::DisabledByHost,
                G2sDisableState::DisabledByHost.id(),
                static_message("Disabled by G2S host"),
            )
            .with(
                G2sDisableState::CommsOffline,
                G2sDisableState::CommsOffline.id(),
                static_message("G2S host communications offline"),
            )
            .with(
                G2sDisableState::ConfigurationChange,
                G2sDisableState::ConfigurationChange.id(),
                static_message("G2S configuration change in progress"),
            )
            .with(
                G2sDisableState::TransportDisabled,
                G2sDisableState::TransportDisabled.id(),
                static_message("G2S transport disabled"),
            )
            .with(
                G2sDisableState::HostOfflineLockup,
                G2sDisableState::HostOfflineLockup.id(),
                static_message("G2S host offline"),
            )
    }
}

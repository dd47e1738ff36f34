/// G2S host disable reasons.
pub mod g2s;
/// SAS host disable reasons.
pub mod sas;

pub use self::g2s::G2sDisableState;
pub use self::sas::SasDisableState;

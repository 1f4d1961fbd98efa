//! Session protocol: link lifecycle, reconnect and calibration replay.

mod manager;
mod policy;

#[cfg(test)]
mod tests;

pub use manager::{
    CachedCalibration, ConnectionEvent, ConnectionManager, ConnectionStats, ConnectionStatus,
};
pub use policy::ReconnectPolicy;

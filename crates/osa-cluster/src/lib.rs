pub mod client;
pub mod dmg;
pub mod simulated;

pub use client::ControlPlane;
pub use dmg::{DmgClient, DmgConfig};
pub use simulated::{DrainRecord, SimulatedCluster, SimulatedClusterConfig};

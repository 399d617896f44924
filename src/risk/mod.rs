// Risk management module
pub mod rate_gate;

pub use rate_gate::RiskGate;

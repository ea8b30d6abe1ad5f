pub mod downstream;
pub mod error;
pub mod marker;
pub mod marker_gate;

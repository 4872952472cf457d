//! Integration layer: interfaces to the network.

pub mod transport;

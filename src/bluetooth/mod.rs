pub mod bluer_transport;
pub mod decoder;
pub mod gadget;
pub mod transport;

pub use bluer_transport::BluerTransport;
pub use transport::{GattSession, GattTransport, NotifyCallback, SessionGuard};

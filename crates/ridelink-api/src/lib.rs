// ridelink-api: Async transport clients for the ridelink backend (socket session + HTTP query API)

pub mod error;
pub mod query;
pub mod socket;
pub mod transport;

pub use error::Error;
pub use query::QueryClient;
pub use socket::{
    AuthParams, Connector, Session, SessionPeer, SessionSender, SessionSignal, WireFrame,
    WsConnector,
};
pub use transport::{TlsMode, TransportConfig};

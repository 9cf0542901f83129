mod connector;
mod session;
mod transport;

pub use connector::NetConnector;
pub use session::{LineSession, Registration};

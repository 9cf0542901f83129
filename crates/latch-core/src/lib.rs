pub mod backoff;
pub mod machine;
pub mod shutdown;

pub use backoff::Backoff;
pub use machine::{
    ConnectionState, Connector, Decision, OperatorPrompt, Outcome, ReconnectMachine, Session,
    SessionEnd, Target,
};
pub use shutdown::ShutdownSignal;

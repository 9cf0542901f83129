pub mod error;
pub mod fingerprint;
pub mod store;
pub mod verifier;

pub use error::{ConnectError, UntrustedCertificate};
pub use fingerprint::CertificateFingerprints;
pub use store::{TrustError, TrustStore, read_known_hosts};
pub use verifier::PinningVerifier;

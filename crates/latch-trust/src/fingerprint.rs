use sha2::{Digest, Sha256, Sha512};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFingerprints {
    /// SHA-256 of the certificate DER.
    pub short: String,
    /// SHA-512 of the certificate DER; this is the value stored in known_hosts.
    pub long: String,
}

impl CertificateFingerprints {
    pub fn of(der: &[u8]) -> Self {
        Self {
            short: render(&Sha256::digest(der)),
            long: render(&Sha512::digest(der)),
        }
    }
}

/// Colon separated uppercase hex, e.g. `AB:01:FF`.
fn render(digest: &[u8]) -> String {
    let encoded = hex::encode_upper(digest);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 2);
    for (idx, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if idx > 0 {
            out.push(':');
        }
        out.extend(pair.iter().map(|b| *b as char));
    }
    out
}

fn normalize(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Compares fingerprints ignoring case and colon separators, so plain
/// `hexdigest` style entries written by older tooling still match.
pub fn matches(recorded: &str, presented: &str) -> bool {
    let recorded = normalize(recorded.trim());
    !recorded.is_empty() && recorded == normalize(presented.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_both_digests_for_same_input() {
        let fp = CertificateFingerprints::of(b"certificate");
        // 32 and 64 bytes, two hex chars each plus separators.
        assert_eq!(fp.short.len(), 32 * 3 - 1);
        assert_eq!(fp.long.len(), 64 * 3 - 1);
        assert!(fp.long.split(':').all(|pair| pair.len() == 2));
        assert_eq!(fp.long, fp.long.to_uppercase());
    }

    #[test]
    fn digest_of_empty_input_is_stable() {
        let fp = CertificateFingerprints::of(b"");
        assert!(fp.short.starts_with("E3:B0:C4:42"));
        assert!(fp.long.starts_with("CF:83:E1:35"));
    }

    #[test]
    fn match_ignores_case_and_separators() {
        let fp = CertificateFingerprints::of(b"certificate");
        let plain = fp.long.replace(':', "").to_lowercase();
        assert!(matches(&plain, &fp.long));
        assert!(matches(&fp.long, &fp.long));
        assert!(!matches(&fp.short, &fp.long));
        assert!(!matches("", ""));
    }
}

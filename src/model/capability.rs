/// MySQL handshake capability flags relevant to pool capability matching
/// (§4.D "Taking from the pool during connect"). Values mirror the
/// positional bits of the protocol's `CLIENT_*` capability flags; only the
/// ones this crate reasons about are named, the rest are carried opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u32);

pub const CLIENT_SSL: u32 = 1 << 11;
pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;
pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
pub const CLIENT_COMPRESS: u32 = 1 << 5;
pub const CLIENT_ZSTD_COMPRESSION_ALGORITHM: u32 = 1 << 26;
pub const CLIENT_QUERY_ATTRIBUTES: u32 = 1 << 27;

/// Capabilities that are per-connection rather than per-server, and so are
/// masked off before comparing a client's requested capabilities against a
/// pooled connection's capabilities (§4.D: SSL, query-attributes, both
/// compression flavors, session-tracking, text-result-with-session-tracking,
/// multi-statements).
const PER_CONNECTION_MASK: u32 = CLIENT_SSL
    | CLIENT_QUERY_ATTRIBUTES
    | CLIENT_COMPRESS
    | CLIENT_ZSTD_COMPRESSION_ALGORITHM
    | CLIENT_SESSION_TRACK
    | CLIENT_DEPRECATE_EOF
    | CLIENT_MULTI_STATEMENTS;

impl CapabilitySet {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Capabilities with the per-connection bits cleared, for comparing a
    /// client's handshake against a pooled server connection's handshake.
    pub fn masked(&self) -> u32 {
        self.0 & !PER_CONNECTION_MASK
    }

    pub fn matches_for_pooling(&self, other: &CapabilitySet) -> bool {
        self.masked() == other.masked()
    }
}

/// The transport requirement a pool candidate must satisfy, independent of
/// its capability bitset (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConstraint {
    /// Requires TLS with a client certificate on the pooled side.
    HasClientCert,
    /// Requires TLS, any certificate state.
    Encrypted,
    /// Requires the pooled connection's secure-transport flag, regardless
    /// of whether that security came from TLS or the transport itself
    /// (e.g. a Unix socket).
    Secure,
    /// Requires no TLS.
    Plaintext,
}

impl TransportConstraint {
    pub fn is_satisfied_by(&self, is_tls: bool, has_client_cert: bool, is_secure_transport: bool) -> bool {
        match self {
            Self::HasClientCert => is_tls && has_client_cert,
            Self::Encrypted => is_tls,
            Self::Secure => is_secure_transport,
            Self::Plaintext => !is_tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_ignores_per_connection_flags() {
        let a = CapabilitySet::from_bits(CLIENT_TRANSACTIONS | CLIENT_SSL);
        let b = CapabilitySet::from_bits(CLIENT_TRANSACTIONS | CLIENT_COMPRESS);
        assert!(a.matches_for_pooling(&b));
    }

    #[test]
    fn differing_core_flags_do_not_match() {
        let a = CapabilitySet::from_bits(CLIENT_TRANSACTIONS);
        let b = CapabilitySet::from_bits(0);
        assert!(!a.matches_for_pooling(&b));
    }

    #[test]
    fn transport_constraints() {
        assert!(TransportConstraint::Encrypted.is_satisfied_by(true, false, false));
        assert!(!TransportConstraint::HasClientCert.is_satisfied_by(true, false, false));
        assert!(TransportConstraint::Plaintext.is_satisfied_by(false, false, false));
        assert!(TransportConstraint::Secure.is_satisfied_by(false, false, true));
    }
}

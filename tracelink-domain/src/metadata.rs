use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Header names
// ---------------------------------------------------------------------------

pub const LICENSE_KEY_HEADER: &str = "license_key";
pub const RUN_TOKEN_HEADER: &str = "agent_run_token";

/// Percentage of spans the observer should fail (testing only).
pub const FLAKY_HEADER: &str = "flaky";

/// Status code the observer returns for a flaky failure (testing only).
pub const FLAKY_CODE_HEADER: &str = "flaky_code";

/// Transport headers sent when a channel is opened.
pub type Headers = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// ChannelTarget
// ---------------------------------------------------------------------------

/// Where and how the transport should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    // ---
    pub host: String,
    pub port: u16,

    /// `true` = no TLS. The channel factory alone interprets this.
    pub use_plaintext: bool,

    /// Ask the transport to compress outbound messages.
    pub use_compression: bool,
}

// ---

impl ChannelTarget {
    // ---
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// ConnectionMetadata
// ---------------------------------------------------------------------------

/// Credentials and run-scoped metadata presented on every new channel.
///
/// Never mutated in place: an update replaces the whole value so readers
/// see either the old or the new metadata, never a mix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetadata {
    // ---
    pub license_key: String,

    /// Issued by the collector on connect. `None` before the first connect.
    pub agent_run_token: Option<String>,

    /// Extra request metadata supplied by the collector, forwarded verbatim.
    pub request_metadata: BTreeMap<String, String>,
}

// ---

impl ConnectionMetadata {
    // ---
    pub fn new(license_key: impl Into<String>) -> Self {
        // ---
        Self {
            license_key: license_key.into(),
            ..Default::default()
        }
    }

    // ---

    /// Flatten into transport headers.
    ///
    /// Request metadata goes in first so the credential headers always win
    /// a key collision.
    pub fn to_headers(&self) -> Headers {
        // ---
        let mut headers: Headers = self
            .request_metadata
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        headers.insert(LICENSE_KEY_HEADER.into(), self.license_key.clone());
        if let Some(token) = &self.agent_run_token {
            headers.insert(RUN_TOKEN_HEADER.into(), token.clone());
        }
        headers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::collections::BTreeMap;

    use super::{ConnectionMetadata, LICENSE_KEY_HEADER, RUN_TOKEN_HEADER};

    #[test]
    fn headers_before_first_connect_carry_only_license_key() {
        // ---
        let headers = ConnectionMetadata::new("lk-123").to_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[LICENSE_KEY_HEADER], "lk-123");
        assert!(!headers.contains_key(RUN_TOKEN_HEADER));
    }

    // ---

    #[test]
    fn credential_headers_win_collisions() {
        // ---
        let mut request_metadata = BTreeMap::new();
        request_metadata.insert("License_Key".to_string(), "spoofed".to_string());
        request_metadata.insert("X-Entity".to_string(), "entity-1".to_string());

        let md = ConnectionMetadata {
            license_key: "real".into(),
            agent_run_token: Some("run-1".into()),
            request_metadata,
        };
        let headers = md.to_headers();

        assert_eq!(headers[LICENSE_KEY_HEADER], "real");
        assert_eq!(headers[RUN_TOKEN_HEADER], "run-1");
        assert_eq!(headers["x-entity"], "entity-1");
    }
}

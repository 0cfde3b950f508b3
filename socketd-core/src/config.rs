//! Per-channel configuration.
//!
//! A `ChannelConfig` carries the knobs a channel and its sessions share:
//! role (client or server, for logs), stream-id generation, fragmentation
//! thresholds, and the default request timeout. It also owns the stream
//! registry and fragment assembler, which are shared across every session
//! and stream on the channel.

use std::sync::Arc;
use std::time::Duration;

use crate::fragment::FragmentAssembler;
use crate::stream::StreamRegistry;

/// Hard upper bound on the fragmentation threshold.
pub const MAX_SIZE_FRAGMENT: usize = 16 * 1024 * 1024;

/// Channel configuration.
///
/// # Examples
///
/// ```
/// use socketd_core::config::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::client()
///     .with_fragment_size(16 * 1024)
///     .with_request_timeout(Duration::from_secs(5));
/// assert!(config.client_mode());
/// ```
pub struct ChannelConfig {
    client_mode: bool,
    id_generator: Box<dyn Fn() -> String + Send + Sync>,

    /// Entities above this size are split into fragments on send.
    fragment_size: usize,
    /// Reassemble inbound fragments here (when false, they pass through).
    fragment_aggr_enabled: bool,
    /// Cap on per-sid buffered bytes during reassembly.
    fragment_buffer_limit: usize,

    /// Default deadline for `send_and_request` when the caller passes zero.
    request_timeout: Duration,
}

impl ChannelConfig {
    fn new(client_mode: bool) -> Self {
        Self {
            client_mode,
            id_generator: Box::new(guid),
            fragment_size: 16 * 1024,
            fragment_aggr_enabled: true,
            fragment_buffer_limit: 64 * 1024 * 1024,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Configuration for the connecting side.
    #[must_use]
    pub fn client() -> Self {
        Self::new(true)
    }

    /// Configuration for the accepting side.
    #[must_use]
    pub fn server() -> Self {
        Self::new(false)
    }

    #[must_use]
    pub const fn client_mode(&self) -> bool {
        self.client_mode
    }

    /// Role name used in logs.
    #[must_use]
    pub const fn role_name(&self) -> &'static str {
        if self.client_mode {
            "Client"
        } else {
            "Server"
        }
    }

    /// Replace the stream-id generator (default: random 128-bit hex guid).
    #[must_use]
    pub fn with_id_generator(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.id_generator = Box::new(generator);
        self
    }

    /// Set the fragmentation threshold (clamped to [`MAX_SIZE_FRAGMENT`]).
    #[must_use]
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.min(MAX_SIZE_FRAGMENT);
        self
    }

    /// Enable or disable inbound fragment reassembly.
    #[must_use]
    pub const fn with_fragment_aggr(mut self, enabled: bool) -> Self {
        self.fragment_aggr_enabled = enabled;
        self
    }

    /// Set the per-sid reassembly buffer cap.
    #[must_use]
    pub const fn with_fragment_buffer_limit(mut self, limit: usize) -> Self {
        self.fragment_buffer_limit = limit;
        self
    }

    /// Set the default request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Generate a fresh stream id.
    #[must_use]
    pub fn generate_sid(&self) -> String {
        (self.id_generator)()
    }

    #[must_use]
    pub const fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    #[must_use]
    pub const fn fragment_aggr_enabled(&self) -> bool {
        self.fragment_aggr_enabled
    }

    #[must_use]
    pub const fn fragment_buffer_limit(&self) -> usize {
        self.fragment_buffer_limit
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Freeze the configuration into the shared per-channel state.
    #[must_use]
    pub fn build(self) -> Arc<SharedConfig> {
        let streams = StreamRegistry::new();
        let fragments = Arc::new(FragmentAssembler::new(
            self.fragment_aggr_enabled,
            self.fragment_buffer_limit,
        ));
        Arc::new(SharedConfig {
            config: self,
            streams,
            fragments,
        })
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("client_mode", &self.client_mode)
            .field("fragment_size", &self.fragment_size)
            .field("fragment_aggr_enabled", &self.fragment_aggr_enabled)
            .field("fragment_buffer_limit", &self.fragment_buffer_limit)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Configuration plus the per-channel shared registries.
///
/// The stream registry and fragment assembler live here so that every
/// session and stream on the channel sees the same bookkeeping.
pub struct SharedConfig {
    config: ChannelConfig,
    streams: Arc<StreamRegistry>,
    fragments: Arc<FragmentAssembler>,
}

impl SharedConfig {
    #[must_use]
    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    #[must_use]
    pub const fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    #[must_use]
    pub const fn fragments(&self) -> &Arc<FragmentAssembler> {
        &self.fragments
    }
}

/// Default stream-id generator: 32 hex chars of randomness.
fn guid() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_guid_is_unique_and_hex() {
        let config = ChannelConfig::client();
        let a = config.generate_sid();
        let b = config.generate_sid();

        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn custom_id_generator_is_used() {
        let config = ChannelConfig::server().with_id_generator(|| "fixed".to_string());
        assert_eq!(config.generate_sid(), "fixed");
        assert_eq!(config.role_name(), "Server");
    }

    #[test]
    fn fragment_size_is_clamped() {
        let config = ChannelConfig::client().with_fragment_size(usize::MAX);
        assert_eq!(config.fragment_size(), MAX_SIZE_FRAGMENT);
    }

    #[test]
    fn shared_config_exposes_registries() {
        let shared = ChannelConfig::client().build();
        assert!(shared.streams().is_empty());
        assert_eq!(shared.fragments().pending(), 0);
    }
}

//! Layering of configuration sources

use crate::config::ProxyConfig;

/// Overlay one configuration on another
pub trait ConfigMerger {
    /// Fields of `other` that differ from the built-in default replace those
    /// of `self`. Optional fields are replaced whenever `other` sets them.
    fn merge(&self, other: impl AsRef<Self>) -> Self where Self: Sized;
}

/// `over` when it was set to something other than the default
fn pick<T: Clone + PartialEq>(base: &T, over: &T, default: &T) -> T {
    (if over == default { base } else { over }).clone()
}

impl ConfigMerger for ProxyConfig {
    fn merge(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let d = Self::default();

        Self {
            listeners: pick(&self.listeners, &other.listeners, &d.listeners),
            log_level: pick(&self.log_level, &other.log_level, &d.log_level),
            buffer_size: pick(&self.buffer_size, &other.buffer_size, &d.buffer_size),
            handshake_timeout: pick(&self.handshake_timeout, &other.handshake_timeout, &d.handshake_timeout),
            connect_timeout: pick(&self.connect_timeout, &other.connect_timeout, &d.connect_timeout),
            shutdown_timeout: pick(&self.shutdown_timeout, &other.shutdown_timeout, &d.shutdown_timeout),
            socks5_auth: other.socks5_auth.clone().or_else(|| self.socks5_auth.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, ListenerConfig};
    use crate::protocol::ProtocolKind;

    #[test]
    fn test_merge_prefers_non_default_values() {
        let mut file_config = ProxyConfig::default();
        file_config.buffer_size = 16384;
        file_config.connect_timeout = 60;
        file_config.listeners = vec![ListenerConfig::new(ProtocolKind::Http, "0.0.0.0:3128".parse().unwrap())];

        let mut env_config = ProxyConfig::default();
        env_config.connect_timeout = 5;
        env_config.socks5_auth = Some(Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        });

        let merged = ProxyConfig::default().merge(&file_config).merge(&env_config);

        assert_eq!(merged.buffer_size, 16384);
        assert_eq!(merged.connect_timeout, 5);
        assert_eq!(merged.listeners, file_config.listeners);
        assert!(merged.socks5_auth.is_some());
        assert_eq!(merged.log_level, "info");
    }

    #[test]
    fn test_merge_default_keeps_values() {
        let mut config = ProxyConfig::default();
        config.log_level = "trace".to_string();

        let merged = config.merge(ProxyConfig::default());
        assert_eq!(merged, config);
    }
}

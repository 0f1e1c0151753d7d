//! Multi Proxy Command Line Tool
//!
//! This binary is the command-line interface for Multi Proxy.

use clap::Parser;
use log::info;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

// Import our library
use multi_proxy::{ListenerSet, ProxyService, StandardProxyService, VERSION, APP_NAME};
use multi_proxy::common::{Result, init_logger};
use multi_proxy::config::{
    self, ConfigLoader, ConfigMerger, ConfigOverrides, ConfigValidator, ProxyConfig, DEFAULT_CONFIG_FILE,
};

/// Multi Proxy: SOCKS4, SOCKS5 and HTTP forward proxy
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Bind host for all listeners
    #[clap(long)]
    host: Option<IpAddr>,

    /// SOCKS4/4a listener port
    #[clap(long)]
    socks4_port: Option<u16>,

    /// SOCKS5 listener port
    #[clap(long)]
    socks5_port: Option<u16>,

    /// HTTP listener port
    #[clap(long)]
    http_port: Option<u16>,

    /// Load configuration from a JSON file
    #[clap(long)]
    config_file: Option<String>,

    /// Load configuration from MULTI_PROXY_* environment variables
    #[clap(long)]
    from_env: bool,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long)]
    log_level: Option<String>,

    /// Seconds a client may take to finish its handshake
    #[clap(long)]
    handshake_timeout: Option<u64>,

    /// Seconds to wait for the upstream connection
    #[clap(long)]
    connect_timeout: Option<u64>,

    /// Relay buffer size in bytes
    #[clap(long)]
    buffer_size: Option<usize>,

    /// Require SOCKS5 username/password authentication with this username
    #[clap(long, requires = "socks5_password")]
    socks5_username: Option<String>,

    /// Password for SOCKS5 authentication
    #[clap(long, requires = "socks5_username")]
    socks5_password: Option<String>,
}

impl Args {
    /// Command line values as overrides
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host,
            socks4_port: self.socks4_port,
            socks5_port: self.socks5_port,
            http_port: self.http_port,
            log_level: self.log_level.clone(),
            buffer_size: self.buffer_size,
            handshake_timeout: self.handshake_timeout,
            connect_timeout: self.connect_timeout,
            socks5_username: self.socks5_username.clone(),
            socks5_password: self.socks5_password.clone(),
        }
    }
}

/// Build the final configuration: defaults, file, environment, command line
fn load_config(args: &Args) -> Result<ProxyConfig> {
    let mut config = ProxyConfig::default();

    // An explicit file must exist; the default one is optional
    let config_file = match &args.config_file {
        Some(path) => Some(path.as_str()),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Some(DEFAULT_CONFIG_FILE),
        None => None,
    };
    if let Some(path) = config_file {
        config = config.merge(ProxyConfig::from_file(path)?);
    }

    if args.from_env {
        config = ConfigOverrides::from_env()?.apply(config)?;
    }

    config = args.overrides().apply(config)?;
    config.validate()?;

    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = load_config(&args)?;

    // Initialize logger
    init_logger(&config.log_level);

    info!("Starting {} v{}", APP_NAME, VERSION);
    config::log_config(&config);

    // Bind everything up front so a port conflict aborts startup
    let config = Arc::new(config);
    let listeners = ListenerSet::bind(&config)?;

    let handle = StandardProxyService::new(listeners, config).start()?;

    info!("Proxy service ready, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");

    handle.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_overrides() {
        let args = Args::parse_from([
            "multi-proxy",
            "--host", "0.0.0.0",
            "--socks5-port", "1080",
            "--connect-timeout", "5",
            "--socks5-username", "user",
            "--socks5-password", "pass",
        ]);
        let overrides = args.overrides();

        assert_eq!(overrides.host, Some("0.0.0.0".parse().unwrap()));
        assert_eq!(overrides.socks5_port, Some(1080));
        assert_eq!(overrides.connect_timeout, Some(5));
        assert_eq!(overrides.socks5_password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_username_requires_password() {
        let result = Args::try_parse_from(["multi-proxy", "--socks5-username", "user"]);
        assert!(result.is_err());
    }
}

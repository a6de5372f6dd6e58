// # dioalertd - Digital-Input Alert Daemon
//
// Thin integration layer: all alert, command and reconnect logic lives in
// dioalert-core. This binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Registers gateways and registry stores
// 4. Runs the alert engine until SIGTERM / SIGINT
//
// ## Configuration
//
// ### Operator
// - `DIOALERT_OPERATOR_PHONE`: Operator local number, 7-12 digits (required)
// - `DIOALERT_COUNTRY_CODE`: Prefix for local numbers (default: 549)
// - `DIOALERT_DOMAIN`: Gateway address domain (default: s.whatsapp.net)
//
// ### Listener
// - `DIOALERT_BIND_ADDR`: Bind address (default: 0.0.0.0)
// - `DIOALERT_PORT`: TCP and UDP port (default: 6000)
//
// ### Registry
// - `DIOALERT_REGISTRY_TYPE`: file or memory (default: file)
// - `DIOALERT_RECIPIENTS_PATH`: Recipient list file (default: ./numeros_notif.json)
// - `DIOALERT_NAMES_PATH`: Device name file (default: ./nombres_imei.json)
//
// ### Gateway
// - `DIOALERT_GATEWAY_URL`: Messaging bridge base URL (default: http://127.0.0.1:3000)
// - `DIOALERT_GATEWAY_TOKEN`: Bridge bearer token (optional)
// - `DIOALERT_POLL_INTERVAL_MS`: Inbound poll interval (default: 2000)
// - `DIOALERT_RECONNECT_DELAY_SECS`: Delay before reconnecting (default: 5)
//
// ### Alerts
// - `DIOALERT_PACING_MS`: Delay between sends of one broadcast (default: 800)
// - `DIOALERT_INPUT_LABELS`: Label overrides, e.g. `in1=Front door,in3=Vault`
//
// ### Logging
// - `DIOALERT_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export DIOALERT_OPERATOR_PHONE=1156511894
// export DIOALERT_GATEWAY_URL=http://127.0.0.1:3000
// export DIOALERT_RECIPIENTS_PATH=/var/lib/dioalert/numeros_notif.json
// export DIOALERT_NAMES_PATH=/var/lib/dioalert/nombres_imei.json
//
// dioalertd
// ```

use anyhow::{Context, Result};
use dioalert_core::config::{GatewayProviderConfig, RegistryConfig};
use dioalert_core::engine::EngineEvent;
use dioalert_core::{AlertConfig, AlertEngine, GatewayRegistry, InputLabels};
use std::env;
use std::process::ExitCode;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    operator_phone: String,
    country_code: Option<String>,
    domain: Option<String>,
    bind_addr: Option<String>,
    port: Option<u16>,
    registry_type: String,
    recipients_path: Option<String>,
    names_path: Option<String>,
    gateway_url: Option<String>,
    gateway_token: String,
    poll_interval_ms: Option<u64>,
    reconnect_delay_secs: Option<u64>,
    pacing_ms: Option<u64>,
    input_labels: Option<String>,
    log_level: String,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{} is not valid ('{}'): {}", name, raw, e))
        })
        .transpose()
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            operator_phone: var("DIOALERT_OPERATOR_PHONE").context(
                "DIOALERT_OPERATOR_PHONE is required. \
                Set it via: export DIOALERT_OPERATOR_PHONE=1156511894",
            )?,
            country_code: var("DIOALERT_COUNTRY_CODE"),
            domain: var("DIOALERT_DOMAIN"),
            bind_addr: var("DIOALERT_BIND_ADDR"),
            port: parsed("DIOALERT_PORT")?,
            registry_type: var("DIOALERT_REGISTRY_TYPE").unwrap_or_else(|| "file".to_string()),
            recipients_path: var("DIOALERT_RECIPIENTS_PATH"),
            names_path: var("DIOALERT_NAMES_PATH"),
            gateway_url: var("DIOALERT_GATEWAY_URL"),
            gateway_token: var("DIOALERT_GATEWAY_TOKEN").unwrap_or_default(),
            poll_interval_ms: parsed("DIOALERT_POLL_INTERVAL_MS")?,
            reconnect_delay_secs: parsed("DIOALERT_RECONNECT_DELAY_SECS")?,
            pacing_ms: parsed("DIOALERT_PACING_MS")?,
            input_labels: var("DIOALERT_INPUT_LABELS"),
            log_level: var("DIOALERT_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate what the core config types cannot check
    fn validate(&self) -> Result<()> {
        match self.registry_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "DIOALERT_REGISTRY_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.registry_type
            ),
        }

        if self.registry_type == "file" {
            for path in [&self.recipients_path, &self.names_path].into_iter().flatten() {
                if let Some(parent) = std::path::Path::new(path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "Registry directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
        }

        if let Some(interval) = self.poll_interval_ms
            && !(100..=60_000).contains(&interval)
        {
            anyhow::bail!(
                "DIOALERT_POLL_INTERVAL_MS must be between 100 and 60000. Got: {}",
                interval
            );
        }

        if let Some(delay) = self.reconnect_delay_secs
            && !(1..=300).contains(&delay)
        {
            anyhow::bail!(
                "DIOALERT_RECONNECT_DELAY_SECS must be between 1 and 300 seconds. Got: {}",
                delay
            );
        }

        if let Some(pacing) = self.pacing_ms
            && pacing > 60_000
        {
            anyhow::bail!("DIOALERT_PACING_MS must be at most 60000. Got: {}", pacing);
        }

        if let Some(url) = &self.gateway_url
            && url.starts_with("http://")
            && !is_loopback_url(url)
        {
            eprintln!(
                "WARNING: DIOALERT_GATEWAY_URL uses HTTP to a remote host. \
                The bridge token travels in clear text."
            );
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "DIOALERT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    /// Build the engine configuration
    fn alert_config(&self) -> Result<AlertConfig> {
        let mut config = AlertConfig::new(self.operator_phone.trim());

        if let Some(code) = &self.country_code {
            config.operator.country_code = code.trim().to_string();
        }
        if let Some(domain) = &self.domain {
            config.operator.domain = domain.trim().to_string();
        }
        if let Some(addr) = &self.bind_addr {
            config.listener.bind_addr = addr.trim().to_string();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }

        config.registry = match self.registry_type.as_str() {
            "memory" => RegistryConfig::Memory,
            _ => {
                let RegistryConfig::File {
                    recipients_path,
                    names_path,
                } = RegistryConfig::default()
                else {
                    anyhow::bail!("default registry is not file-backed");
                };
                RegistryConfig::File {
                    recipients_path: self.recipients_path.clone().unwrap_or(recipients_path),
                    names_path: self.names_path.clone().unwrap_or(names_path),
                }
            }
        };

        if let GatewayProviderConfig::Http {
            base_url,
            api_token,
            poll_interval_ms,
        } = &mut config.gateway.provider
        {
            if let Some(url) = &self.gateway_url {
                *base_url = url.trim().to_string();
            }
            api_token.clone_from(&self.gateway_token);
            if let Some(interval) = self.poll_interval_ms {
                *poll_interval_ms = interval;
            }
        }
        if let Some(delay) = self.reconnect_delay_secs {
            config.gateway.reconnect_delay_secs = delay;
        }
        if let Some(pacing) = self.pacing_ms {
            config.dispatcher.pacing_ms = pacing;
        }
        if let Some(labels) = &self.input_labels {
            config.inputs = InputLabels::default().parse_overrides(labels)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn is_loopback_url(url: &str) -> bool {
    let host = url
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .unwrap_or_default();
    matches!(host, "127.0.0.1" | "localhost")
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DaemonExitCode::ConfigError.into();
    }

    let alert_config = match config.alert_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!("Starting dioalertd");
    info!(
        "Operator {} on {} (registry: {})",
        alert_config.operator.address(),
        alert_config.listener.socket_addr(),
        alert_config.registry.type_name()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(alert_config).await {
            error!("Daemon error: {:#}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: AlertConfig) -> Result<()> {
    let registry = GatewayRegistry::with_builtin_stores();

    #[cfg(feature = "http")]
    {
        debug!("Registering HTTP bridge gateway");
        dioalert_gateway_http::register(&registry);
    }

    let gateway = registry
        .create_gateway(&config.gateway.provider)
        .context("Failed to create messaging gateway")?;
    let store = registry
        .create_registry_store(
            &config.registry,
            &config.operator.address_format(),
            &config.operator.address(),
        )
        .await
        .context("Failed to open registry store")?;

    info!(
        "Gateway: {}, registry store: {}",
        gateway.gateway_name(),
        config.registry.type_name()
    );

    let (engine, events) = AlertEngine::new(gateway, store, config)?;
    tokio::spawn(log_events(events));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    engine.run_with_shutdown(Some(shutdown_rx)).await?;
    info!("Daemon stopped");
    Ok(())
}

/// Surface engine events that are not already logged by the engine
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::ListenerFailed {
                transport,
                error: reason,
            } => {
                warn!("{} listener unavailable: {}", transport, reason)
            }
            EngineEvent::BroadcastCompleted {
                delivered, failed, ..
            } if failed > 0 => {
                warn!("Alert reached {} recipient(s), {} failed", delivered, failed)
            }
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C on non-Unix platforms
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            operator_phone: "1156511894".to_string(),
            country_code: None,
            domain: None,
            bind_addr: None,
            port: None,
            registry_type: "file".to_string(),
            recipients_path: None,
            names_path: None,
            gateway_url: None,
            gateway_token: String::new(),
            poll_interval_ms: None,
            reconnect_delay_secs: None,
            pacing_ms: None,
            input_labels: None,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn defaults_build_a_valid_config() {
        let config = base();
        config.validate().unwrap();
        let alert = config.alert_config().unwrap();
        assert_eq!(alert.operator.address(), "5491156511894@s.whatsapp.net");
        assert_eq!(alert.registry.type_name(), "file");
        assert_eq!(alert.listener.port, 6000);
    }

    #[test]
    fn overrides_reach_the_alert_config() {
        let mut config = base();
        config.registry_type = "memory".to_string();
        config.port = Some(7000);
        config.gateway_url = Some("http://127.0.0.1:4000".to_string());
        config.gateway_token = "secret".to_string();
        config.poll_interval_ms = Some(500);
        config.pacing_ms = Some(0);
        config.input_labels = Some("in1=Front door".to_string());

        let alert = config.alert_config().unwrap();
        assert_eq!(alert.registry.type_name(), "memory");
        assert_eq!(alert.listener.port, 7000);
        assert_eq!(alert.dispatcher.pacing_ms, 0);
        assert_eq!(alert.inputs.label(dioalert_core::InputId::In1), "Front door");
        match alert.gateway.provider {
            GatewayProviderConfig::Http {
                base_url,
                api_token,
                poll_interval_ms,
            } => {
                assert_eq!(base_url, "http://127.0.0.1:4000");
                assert_eq!(api_token, "secret");
                assert_eq!(poll_interval_ms, 500);
            }
            other => panic!("unexpected provider: {:?}", other),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = base();
        config.registry_type = "redis".to_string();
        assert!(config.validate().is_err());

        let mut config = base();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = base();
        config.reconnect_delay_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = base();
        config.operator_phone = "12ab".to_string();
        assert!(config.alert_config().is_err());

        let mut config = base();
        config.input_labels = Some("in7=Nope".to_string());
        assert!(config.alert_config().is_err());
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_url("http://127.0.0.1:3000"));
        assert!(is_loopback_url("http://localhost/api"));
        assert!(!is_loopback_url("http://bridge.example.net:3000"));
    }
}

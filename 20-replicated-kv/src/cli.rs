use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, ValueHint};

use crate::config::Settings;
use crate::error::KvError;

/// Run a storage node. Role and topology arrive later in an `initialize` message.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct NodeArgs {
    /// TCP port to listen on (0 picks an ephemeral port).
    #[arg(value_parser = parse_port)]
    pub port: u16,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

/// Run a client that executes a command script once initialized.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// TCP port to listen on for results (0 picks an ephemeral port).
    #[arg(value_parser = parse_port)]
    pub port: u16,

    /// Read commands from this file instead of stdin.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub script: Option<PathBuf>,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Host to bind the listener on.
    #[arg(long, env = "KV_LISTEN_HOST", default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Give up on replica acknowledgements after this many milliseconds.
    #[arg(long, env = "KV_QUORUM_TIMEOUT_MS")]
    pub quorum_timeout_ms: Option<u64>,

    /// Give up waiting for a reply to a client request after this many milliseconds.
    #[arg(long, env = "KV_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Pause before each replica-set the primary sends.
    #[arg(long, env = "KV_REPLICATION_DELAY_MS", default_value_t = 0)]
    pub replication_delay_ms: u64,
}

impl TuningArgs {
    pub fn settings(&self) -> Settings {
        Settings {
            quorum_timeout: self.quorum_timeout_ms.map(Duration::from_millis),
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
            replication_delay: Duration::from_millis(self.replication_delay_ms),
        }
    }

    pub fn listen_addr(&self, port: u16) -> String {
        format!("{}:{port}", self.listen_host)
    }
}

/// Accepts `0 <= port < 65535`.
pub fn parse_port(raw: &str) -> Result<u16, KvError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port < u16::MAX => Ok(port),
        _ => Err(KvError::InvalidPort(raw.to_string())),
    }
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_bounds() {
        assert_eq!(parse_port("0").unwrap(), 0);
        assert_eq!(parse_port("8080").unwrap(), 8080);
        assert_eq!(parse_port("65534").unwrap(), 65534);
        for bad in ["65535", "70000", "-1", "abc", ""] {
            assert!(matches!(parse_port(bad), Err(KvError::InvalidPort(_))), "{bad}");
        }
    }

    #[test]
    fn tuning_flags_map_to_settings() {
        let args = NodeArgs::try_parse_from([
            "kv-node",
            "9000",
            "--quorum-timeout-ms",
            "250",
            "--replication-delay-ms",
            "5000",
        ])
        .unwrap();

        assert_eq!(args.port, 9000);
        let settings = args.tuning.settings();
        assert_eq!(settings.quorum_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.request_timeout, None);
        assert_eq!(settings.replication_delay, Duration::from_secs(5));
        assert_eq!(args.tuning.listen_addr(args.port), "127.0.0.1:9000");
    }

    #[test]
    fn client_accepts_a_script_path() {
        let args = ClientArgs::try_parse_from(["kv-client", "0", "--script", "ops.txt"]).unwrap();
        assert_eq!(args.script, Some(PathBuf::from("ops.txt")));
        assert!(ClientArgs::try_parse_from(["kv-client"]).is_err());
    }
}

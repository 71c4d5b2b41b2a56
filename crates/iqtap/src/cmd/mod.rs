use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use iqtap_session::SessionConfig;
use iqtap_transport::{ClientIdentity, ServerVerification, TlsOptions, TransportOptions};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::logging::LogLevel;
use crate::output::OutputFormat;

pub mod dump;
pub mod version;
pub mod ws;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a scripted remote API session, or listen for notifications.
    Ws(WsArgs),
    /// Capture IQ samples and split them into per-slot files.
    Dump(DumpArgs),
    /// Show version information.
    Version(VersionArgs),
}

impl Command {
    /// Apply options that were given among the `ws` script items.
    pub fn absorb_trailing_options(&mut self) -> CliResult<()> {
        match self {
            Command::Ws(args) => args.absorb_trailing_options(),
            _ => Ok(()),
        }
    }

    /// Log level after per-command verbosity flags.
    pub fn log_level(&self, requested: LogLevel) -> LogLevel {
        match self {
            Command::Ws(args) if args.script_mode => LogLevel::Error,
            Command::Ws(args) if args.quiet => requested.min(LogLevel::Warn),
            Command::Dump(args) if args.verbose => requested.max(LogLevel::Debug),
            _ => requested,
        }
    }
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Ws(args) => block_on(ws::run(args, format)),
        Command::Dump(args) => block_on(dump::run(args, format)),
    }
}

fn block_on<F: std::future::Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    runtime.block_on(future)
}

/// Connection and session options shared by `ws` and `dump`.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Connect with wss://. The server certificate is not checked unless
    /// --ssl-ca or --ssl-verify is given.
    #[arg(long)]
    pub ssl: bool,
    /// Check the server certificate against this CA file (PEM). Implies --ssl.
    #[arg(long, value_name = "FILE")]
    pub ssl_ca: Option<PathBuf>,
    /// Check the server certificate against the system trust store. Implies --ssl.
    #[arg(long, conflicts_with = "ssl_ca")]
    pub ssl_verify: bool,
    /// Client certificate and private key (PEM). Implies --ssl.
    #[arg(long, num_args = 2, value_names = ["CERT", "KEY"])]
    pub ssl_cert: Vec<PathBuf>,
    /// Origin header sent with the upgrade request.
    #[arg(long, default_value = "Test")]
    pub origin: String,
    /// Reply timeout per message (e.g. 60, 2.5, 500ms).
    #[arg(short = 't', long, default_value = "60")]
    pub timeout: String,
    /// Connect and authentication timeout. Defaults to --timeout.
    #[arg(long)]
    pub connect_timeout: Option<String>,
    /// Password for authenticated servers.
    #[arg(short = 'p', long, env = "IQTAP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl SessionArgs {
    pub fn transport_options(&self) -> TransportOptions {
        let verification = match (&self.ssl_ca, self.ssl_verify) {
            (Some(ca), _) => ServerVerification::CaFile(ca.clone()),
            (None, true) => ServerVerification::System,
            (None, false) => ServerVerification::Disabled,
        };
        let identity = match self.ssl_cert.as_slice() {
            [cert, key] => Some(ClientIdentity {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        };
        TransportOptions {
            tls: self.ssl || self.ssl_verify || self.ssl_ca.is_some() || identity.is_some(),
            origin: self.origin.clone(),
            tls_options: TlsOptions {
                verification,
                identity,
            },
        }
    }

    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let timeout = parse_duration(&self.timeout)?;
        let connect_timeout = match &self.connect_timeout {
            Some(value) => parse_duration(value)?,
            None => timeout,
        };
        Ok(SessionConfig {
            timeout,
            connect_timeout,
            password: self.password.clone(),
            ..SessionConfig::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct WsArgs {
    /// Server address (host:port) or component alias (enb, mme, ue, ...).
    pub server: String,
    /// Script items, run in order: a JSON message (object or array),
    /// `-f <file>`, `-w <seconds>`, `-e <event>` or `-l` (listen).
    /// Options may also appear between items.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "SCRIPT")]
    pub items: Vec<String>,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Replay the script N more times after the first run (at least once).
    #[arg(long = "loop", value_name = "N")]
    pub loop_count: Option<u32>,
    /// Let notifications resolve their request while listening.
    #[arg(short = 'n', long)]
    pub notifications: bool,
    /// Print server errors instead of failing.
    #[arg(long)]
    pub no_error: bool,
    /// Template definition, substituted for `%NAME%`.
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    pub define: Vec<String>,
    /// Templater for outgoing messages. Defaults to json_util when found.
    #[arg(long, value_name = "PROGRAM")]
    pub json_filter: Option<PathBuf>,
    /// Record every side-channel event to FILE.
    #[arg(long, value_name = "FILE")]
    pub bin: Option<PathBuf>,
    /// Record side-channel events with LABEL to FILE.
    #[arg(long, value_name = "LABEL=FILE")]
    pub bin_label: Vec<String>,
    /// Print messages as one JSON document per line, without logs.
    #[arg(long = "script")]
    pub script_mode: bool,
    /// Do not print received messages.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl WsArgs {
    /// How many times the script is replayed after its first run.
    pub fn replays(&self) -> u32 {
        self.loop_count.map_or(0, |n| n.max(1))
    }

    /// Options may follow script items (`enb '{...}' -t 5 --no-error`).
    /// Clap hands everything after the first item over as script tokens;
    /// pull the known options back out and keep the rest in order.
    pub fn absorb_trailing_options(&mut self) -> CliResult<()> {
        let tokens = std::mem::take(&mut self.items);
        let mut tokens = tokens.into_iter();
        while let Some(token) = tokens.next() {
            let (flag, inline) = match token.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (token.clone(), None),
            };
            let mut inline = inline;
            let mut value = |name: &str| {
                inline
                    .take()
                    .or_else(|| tokens.next())
                    .ok_or_else(|| CliError::usage(format!("{name} needs a value")))
            };

            match flag.as_str() {
                // Script items with an operand stay together.
                "-f" | "-e" | "-w" => {
                    let operand = value(&flag)?;
                    self.items.push(token);
                    self.items.push(operand);
                }
                "-t" | "--timeout" => self.session.timeout = value(&flag)?,
                "--connect-timeout" => self.session.connect_timeout = Some(value(&flag)?),
                "-p" | "--password" => self.session.password = Some(value(&flag)?),
                "--origin" => self.session.origin = value(&flag)?,
                "--ssl" => self.session.ssl = true,
                "--ssl-verify" => self.session.ssl_verify = true,
                "--ssl-ca" => self.session.ssl_ca = Some(PathBuf::from(value(&flag)?)),
                "--ssl-cert" => {
                    let cert = PathBuf::from(value(&flag)?);
                    let key = PathBuf::from(value(&flag)?);
                    self.session.ssl_cert = vec![cert, key];
                }
                "--loop" => {
                    let count = value(&flag)?;
                    let count = count
                        .parse()
                        .map_err(|_| CliError::usage(format!("invalid --loop count: {count}")))?;
                    self.loop_count = Some(count);
                }
                "-n" | "--notifications" => self.notifications = true,
                "--no-error" => self.no_error = true,
                "-D" => self.define.push(value(&flag)?),
                "--json-filter" => self.json_filter = Some(PathBuf::from(value(&flag)?)),
                "--bin" => self.bin = Some(PathBuf::from(value(&flag)?)),
                "--bin-label" => self.bin_label.push(value(&flag)?),
                "--script" => self.script_mode = true,
                "-q" | "--quiet" => self.quiet = true,
                define if define.starts_with("-D") => self.define.push(define[2..].to_string()),
                _ => self.items.push(token),
            }
        }
        if self.session.ssl_verify && self.session.ssl_ca.is_some() {
            return Err(CliError::usage(
                "--ssl-verify cannot be used with --ssl-ca",
            ));
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Server address (host:port) or component alias.
    pub server: String,
    /// Output directory; regular files in it are removed first.
    pub path: PathBuf,
    /// Capture duration in milliseconds.
    pub duration_ms: Option<u64>,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Capture transmitted samples.
    #[arg(long)]
    pub tx: bool,
    /// Capture received samples.
    #[arg(long)]
    pub rx: bool,
    /// RF port to capture; repeat for several. Default: all.
    #[arg(long = "rf-port", value_name = "N")]
    pub rf_ports: Vec<u32>,
    /// Debug logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,
    /// Keep raw capture files after splitting.
    #[arg(long)]
    pub keep_raw: bool,
    /// Read buffer for splitting, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or bare seconds (fractions allowed).
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    let secs = if millis { value / 1000.0 } else { value };
    Duration::try_from_secs_f64(secs)
        .map_err(|_| CliError::new(USAGE, format!("duration out of range: {input}")))
}

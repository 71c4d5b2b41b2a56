mod cmd;
mod exit;
mod logging;
mod output;

use clap::error::ErrorKind;
use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "iqtap",
    version,
    about = "Remote API client and IQ capture tool for baseband simulators"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let mut cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit::SUCCESS,
                _ => exit::USAGE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    if let Err(err) = cli.command.absorb_trailing_options() {
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }
    init_logging(cli.log_format, cli.command.log_level(cli.log_level));

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_items_follow_the_server() {
        let cli = Cli::try_parse_from([
            "iqtap",
            "ws",
            "-t",
            "5",
            "enb",
            r#"{"message":"config_get"}"#,
            "-w",
            "1",
            "-l",
        ])
        .expect("ws args should parse");

        match cli.command {
            Command::Ws(args) => {
                assert_eq!(args.server, "enb");
                assert_eq!(args.items.len(), 4);
                assert_eq!(args.session.timeout, "5");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_dump_subcommand() {
        let cli = Cli::try_parse_from([
            "iqtap", "dump", "--rx", "--rf-port", "0", "--rf-port", "2", "enb", "/tmp/iq", "500",
        ])
        .expect("dump args should parse");

        match cli.command {
            Command::Dump(args) => {
                assert_eq!(args.rf_ports, vec![0, 2]);
                assert_eq!(args.duration_ms, Some(500));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn quiet_and_script_lower_logging() {
        let cli = Cli::try_parse_from(["iqtap", "ws", "--script", "enb", "-l"])
            .expect("ws args should parse");
        assert_eq!(cli.command.log_level(LogLevel::Info), LogLevel::Error);

        let cli = Cli::try_parse_from(["iqtap", "ws", "-q", "enb", "-l"])
            .expect("ws args should parse");
        assert_eq!(cli.command.log_level(LogLevel::Info), LogLevel::Warn);

        let cli = Cli::try_parse_from(["iqtap", "dump", "-v", "--rx", "enb", "/tmp"])
            .expect("dump args should parse");
        assert_eq!(cli.command.log_level(LogLevel::Info), LogLevel::Debug);
    }

    #[test]
    fn quiet_after_script_items_lowers_logging() {
        let mut cli = Cli::try_parse_from(["iqtap", "ws", "enb", "-l", "-q"])
            .expect("ws args should parse");
        cli.command
            .absorb_trailing_options()
            .expect("trailing options apply");
        assert_eq!(cli.command.log_level(LogLevel::Info), LogLevel::Warn);
    }

    #[test]
    fn rejects_missing_server() {
        let err = Cli::try_parse_from(["iqtap", "ws"]).expect_err("server is required");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}

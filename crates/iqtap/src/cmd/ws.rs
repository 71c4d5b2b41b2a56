use std::path::PathBuf;
use std::time::Duration;

use iqtap_frame::{EventSinks, ALL_LABELS};
use iqtap_session::{
    connect, prepare_batch, Command, CommandQueue, DefineFilter, Defines, ExternalFilter, Message,
};
use iqtap_transport::resolve_server;
use tracing::{info, warn};

use crate::cmd::WsArgs;
use crate::exit::{io_error, session_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{OutputFormat, PrintHook};

/// One step of a `ws` script, as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptItem {
    /// A JSON message or array of messages.
    Json(String),
    /// A file holding a JSON message or array.
    File(PathBuf),
    Wait(Duration),
    Listen,
    /// Register for an event.
    Event(String),
}

/// Split the trailing command line into script items.
pub fn parse_script(tokens: &[String]) -> CliResult<Vec<ScriptItem>> {
    let mut items = Vec::new();
    let mut tokens = tokens.iter();
    while let Some(token) = tokens.next() {
        let mut operand = |flag: &str| {
            tokens
                .next()
                .cloned()
                .ok_or_else(|| CliError::usage(format!("{flag} needs a value")))
        };
        let item = match token.as_str() {
            "-l" => ScriptItem::Listen,
            "-f" => ScriptItem::File(PathBuf::from(operand("-f")?)),
            "-e" => ScriptItem::Event(operand("-e")?),
            "-w" => {
                let value = operand("-w")?;
                let secs: f64 = value
                    .parse()
                    .ok()
                    .filter(|secs: &f64| secs.is_finite() && *secs >= 0.0)
                    .ok_or_else(|| CliError::usage(format!("invalid wait delay: {value}")))?;
                ScriptItem::Wait(Duration::from_secs_f64(secs))
            }
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(CliError::usage(format!("unexpected option in script: {other}")));
            }
            other => ScriptItem::Json(other.to_string()),
        };
        items.push(item);
    }
    Ok(items)
}

async fn build_commands(
    items: Vec<ScriptItem>,
    external: Option<&ExternalFilter>,
    defines: &DefineFilter,
) -> CliResult<Vec<Command>> {
    let mut commands = Vec::with_capacity(items.len());
    for item in items {
        let command = match item {
            ScriptItem::Json(text) => Command::SendBatch(
                prepare_batch(&text, external, defines)
                    .await
                    .map_err(|err| session_error("bad message", err))?,
            ),
            ScriptItem::File(path) => {
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
                let context = format!("bad message in {}", path.display());
                Command::SendBatch(
                    prepare_batch(&text, external, defines)
                        .await
                        .map_err(|err| session_error(&context, err))?,
                )
            }
            ScriptItem::Wait(delay) => Command::wait(delay),
            ScriptItem::Listen => Command::EnterListen,
            ScriptItem::Event(event) => Command::SendBatch(vec![Message::register(event)]),
        };
        commands.push(command);
    }
    Ok(commands)
}

fn open_sinks(args: &WsArgs) -> CliResult<EventSinks> {
    let mut sinks = EventSinks::new();
    let routes = args
        .bin
        .iter()
        .map(|path| Ok((ALL_LABELS.to_string(), path.clone())))
        .chain(args.bin_label.iter().map(|spec| {
            spec.split_once('=')
                .filter(|(label, path)| !label.is_empty() && !path.is_empty())
                .map(|(label, path)| (label.to_string(), PathBuf::from(path)))
                .ok_or_else(|| CliError::usage(format!("invalid --bin-label '{spec}'")))
        }));
    for route in routes {
        let (label, path) = route?;
        sinks
            .add(label, &path)
            .map_err(|err| CliError::new(FAILURE, format!("open {}: {err}", path.display())))?;
    }
    Ok(sinks)
}

pub async fn run(args: WsArgs, format: OutputFormat) -> CliResult<i32> {
    let format = if args.script_mode {
        OutputFormat::Json
    } else {
        format
    };

    let mut defines = Defines::new();
    for spec in &args.define {
        defines
            .add(spec)
            .map_err(|err| CliError::usage(err.to_string()))?;
    }
    let external = match &args.json_filter {
        Some(program) => Some(ExternalFilter::new(program, defines.clone())),
        None => ExternalFilter::discover(&defines),
    };
    let define_filter = DefineFilter { defines };

    let items = parse_script(&args.items)?;
    let commands = build_commands(items, external.as_ref(), &define_filter).await?;
    let sinks = open_sinks(&args)?;

    let mut config = args.session.session_config()?;
    config.no_error = args.no_error;
    config.resolve_notifications = args.notifications;

    let server = resolve_server(&args.server);
    let session = connect(&server, &args.session.transport_options(), config)
        .await
        .map_err(|err| session_error(&server, err))?;
    let mut session = session
        .with_script(CommandQueue::new(commands, args.replays()))
        .with_sinks(sinks)
        .with_hook(PrintHook {
            format,
            quiet: args.quiet,
            events: !args.script_mode && !args.quiet,
        });

    tokio::select! {
        result = session.run() => {
            let summary = result.map_err(|err| session_error(&server, err))?;
            if summary.unresolved > 0 {
                warn!(unresolved = summary.unresolved, "connection closed with requests outstanding");
            }
            info!(
                sent = summary.sent,
                delivered = summary.delivered,
                events = summary.events,
                server_errors = summary.server_errors,
                "session finished"
            );
            Ok(SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::USAGE;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn items_keep_their_order() {
        let items = parse_script(&tokens(&[
            r#"{"message":"config_get"}"#,
            "-w",
            "1.5",
            "-f",
            "msg.json",
            "-e",
            "cell_update",
            "-l",
        ]))
        .unwrap();
        assert_eq!(
            items,
            vec![
                ScriptItem::Json(r#"{"message":"config_get"}"#.to_string()),
                ScriptItem::Wait(Duration::from_millis(1500)),
                ScriptItem::File(PathBuf::from("msg.json")),
                ScriptItem::Event("cell_update".to_string()),
                ScriptItem::Listen,
            ]
        );
    }

    #[test]
    fn missing_operand_is_a_usage_error() {
        let err = parse_script(&tokens(&["-f"])).unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(parse_script(&tokens(&["-w", "soon"])).is_err());
        assert!(parse_script(&tokens(&["-w", "-1"])).is_err());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let err = parse_script(&tokens(&["-x"])).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[tokio::test]
    async fn events_become_register_messages() {
        let commands = build_commands(
            vec![ScriptItem::Event("log".to_string()), ScriptItem::Listen],
            None,
            &DefineFilter::default(),
        )
        .await
        .unwrap();
        match &commands[0] {
            Command::SendBatch(batch) => {
                assert_eq!(batch[0].message, "register");
                assert_eq!(batch[0].fields["register"], serde_json::json!(["log"]));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(commands[1], Command::EnterListen));
    }

    #[tokio::test]
    async fn defines_are_substituted() {
        let mut defines = Defines::new();
        defines.add("CELL=3").unwrap();
        let commands = build_commands(
            vec![ScriptItem::Json(
                r#"{"message":"cell_gain","cell_id":%CELL%}"#.to_string(),
            )],
            None,
            &DefineFilter { defines },
        )
        .await
        .unwrap();
        match &commands[0] {
            Command::SendBatch(batch) => assert_eq!(batch[0].fields["cell_id"], 3),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

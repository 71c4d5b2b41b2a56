//! Session hooks driving a server: send `echo` on start, print every
//! reply, then stay connected for notifications.
//!
//! Run with:
//!   cargo run --example echo-hook -- 127.0.0.1:9001

use std::time::Duration;

use iqtap::session::{connect, HookContext, Message, SessionConfig, SessionHooks};
use iqtap::transport::{resolve_server, TransportOptions};

struct EchoHook {
    replies: usize,
}

impl SessionHooks for EchoHook {
    fn on_start(&mut self, ctx: &mut HookContext<'_>) {
        let id = ctx.send(Message::new("echo").with("text", "hello"));
        eprintln!("sent echo as {id}");
        ctx.listen();
    }

    fn on_message(&mut self, msg: &Message, ctx: &mut HookContext<'_>) {
        self.replies += 1;
        eprintln!("#{} {}", self.replies, msg.message);
        if self.replies == 1 {
            // Ask again a little later.
            ctx.wait(Duration::from_secs(1), None);
            ctx.send(Message::new("echo").with("text", "again"));
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let server = resolve_server(&std::env::args().nth(1).unwrap_or_else(|| "enb".to_string()));
    let config = SessionConfig {
        password: std::env::var("IQTAP_PASSWORD").ok(),
        ..SessionConfig::default()
    };
    let mut session = connect(&server, &TransportOptions::default(), config)
        .await?
        .with_hook(EchoHook { replies: 0 });

    tokio::select! {
        summary = session.run() => eprintln!("{:?}", summary?),
        _ = tokio::signal::ctrl_c() => eprintln!("interrupted"),
    }
    Ok(())
}

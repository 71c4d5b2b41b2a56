use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use iqtap_session::{
    Command, CommandQueue, HookContext, IdGenerator, Message, MessageId, Session, SessionConfig,
    SessionHooks,
};
use iqtap_transport::Transport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::demux::{demux_file, DemuxConfig, FileReport, SlotTiming};
use crate::error::{CaptureError, Result};
use crate::port::{capture_date, RfPort};

/// Default capture length.
pub const DEFAULT_DURATION_MS: u64 = 1000;

/// Extra reply budget on top of the capture duration.
pub const REPLY_MARGIN: Duration = Duration::from_secs(10);

pub const MSG_CAPTURE: &str = "trx_iq_dump";
pub const MSG_CONFIG_GET: &str = "config_get";

/// What to capture and where.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Output directory; emptied of regular files before capture.
    pub dir: PathBuf,
    pub duration_ms: u64,
    /// RF ports to capture; empty means all.
    pub rf_ports: Vec<u32>,
    pub tx: bool,
    pub rx: bool,
    pub demux: DemuxConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            duration_ms: DEFAULT_DURATION_MS,
            rf_ports: Vec::new(),
            tx: false,
            rx: false,
            demux: DemuxConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.tx && !self.rx {
            return Err(CaptureError::InvalidRequest(
                "at least one of tx or rx must be set".to_string(),
            ));
        }
        if self.duration_ms == 0 {
            return Err(CaptureError::InvalidRequest(
                "duration must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Reply budget for the capture request.
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.duration_ms) + REPLY_MARGIN
    }

    /// Session settings for a capture: the reply timeout covers the capture.
    pub fn session_config(&self, base: SessionConfig) -> SessionConfig {
        SessionConfig {
            timeout: self.reply_timeout(),
            no_error: false,
            ..base
        }
    }

    /// The capture-start request.
    pub fn request(&self) -> Message {
        let mut msg = Message::new(MSG_CAPTURE).with("duration", self.duration_ms);
        if !self.rf_ports.is_empty() {
            msg = msg.with("rf_port", self.rf_ports.clone());
        }
        let dir = self.dir.display();
        if self.tx {
            msg = msg
                .with("tx_header", true)
                .with("tx_filename", format!("{dir}/tx%02d"));
        }
        if self.rx {
            msg = msg
                .with("rx_header", true)
                .with("rx_filename", format!("{dir}/rx%02d"));
        }
        msg
    }
}

/// Check the output directory and remove the regular files in it.
///
/// Returns the canonical directory path.
pub fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    let fail = |reason: String| CaptureError::OutputDir {
        path: dir.to_path_buf(),
        reason,
    };
    let dir = dir
        .canonicalize()
        .map_err(|err| fail(format!("not found ({err})")))?;
    if !dir.is_dir() {
        return Err(fail("not a directory".to_string()));
    }
    let mut removed = 0usize;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    info!(dir = %dir.display(), removed, "output directory cleaned");
    Ok(dir)
}

/// Capture-start reply fields used here.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureReply {
    /// Capture start, milliseconds since the epoch.
    #[serde(default)]
    pub dump_utc: Option<i64>,
    pub rf_ports: Vec<RfPort>,
}

/// Per-port outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PortReport {
    pub index: u32,
    pub sidecar: PathBuf,
    pub cells: usize,
    pub files: Vec<FileReport>,
    /// Why the port's raw files were not split, if they were not.
    pub rejected: Option<String>,
}

/// Outcome of a whole capture.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub dir: PathBuf,
    pub date: Option<String>,
    pub ports: Vec<PortReport>,
}

impl CaptureReport {
    /// Number of raw files that stopped early on an overflow.
    pub fn overflows(&self) -> usize {
        self.ports
            .iter()
            .flat_map(|port| &port.files)
            .filter(|file| file.overflow.is_some())
            .count()
    }
}

/// Forwards correlated replies out of the session.
struct ReplyCollector {
    tx: mpsc::UnboundedSender<Message>,
}

impl SessionHooks for ReplyCollector {
    fn on_message(&mut self, msg: &Message, _ctx: &mut HookContext<'_>) {
        // The receiver outlives the session.
        let _ = self.tx.send(msg.clone());
    }
}

/// Run a capture over `session`: start the dump, fetch the configuration,
/// write port sidecars and split the raw files.
///
/// The output directory must already have been prepared with
/// [`prepare_output_dir`].
pub async fn run_capture<T: Transport>(
    session: Session<T>,
    config: &CaptureConfig,
) -> Result<CaptureReport> {
    config.validate()?;

    let mut ids = IdGenerator::default();
    let mut request = config.request();
    let capture_id = ids.next_id();
    request.message_id = Some(capture_id.clone());
    let mut config_get = Message::new(MSG_CONFIG_GET);
    let config_id = ids.next_id();
    config_get.message_id = Some(config_id.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let script = CommandQueue::new(
        vec![
            Command::SendBatch(vec![request]),
            Command::SendBatch(vec![config_get]),
        ],
        0,
    );
    let mut session = session
        .with_script(script)
        .with_hook(ReplyCollector { tx });

    info!(
        duration_ms = config.duration_ms,
        tx = config.tx,
        rx = config.rx,
        "starting capture"
    );
    session.run().await?;

    let mut replies: HashMap<MessageId, Message> = HashMap::new();
    while let Ok(msg) = rx.try_recv() {
        if let Some(id) = msg.message_id.clone() {
            replies.entry(id).or_insert(msg);
        }
    }
    let capture = replies
        .remove(&capture_id)
        .ok_or_else(|| CaptureError::Aborted(MSG_CAPTURE.to_string()))?;
    let reply: CaptureReply = serde_json::from_value(Value::Object(capture.fields))
        .map_err(|err| CaptureError::InvalidResponse(err.to_string()))?;
    let date = reply.dump_utc.and_then(capture_date);
    if let Some(date) = &date {
        info!(start = %date, "capture started");
    }

    let cell_config = replies.remove(&config_id).map(|msg| Value::Object(msg.fields));
    if cell_config.is_none() {
        warn!("no configuration snapshot, ports will have no cells");
    }

    let mut ports = Vec::with_capacity(reply.rf_ports.len());
    for mut port in reply.rf_ports {
        port.enrich(cell_config.as_ref(), reply.dump_utc);
        let sidecar = port.write_sidecar(&config.dir)?;
        ports.push(split_port(port, sidecar, &config.dir, &config.demux).await?);
    }

    let report = CaptureReport {
        dir: config.dir.clone(),
        date,
        ports,
    };
    info!(
        ports = report.ports.len(),
        overflows = report.overflows(),
        "capture complete"
    );
    Ok(report)
}

async fn split_port(
    port: RfPort,
    sidecar: PathBuf,
    dir: &Path,
    demux: &DemuxConfig,
) -> Result<PortReport> {
    let mut report = PortReport {
        index: port.index,
        sidecar,
        cells: port.cells.len(),
        files: Vec::new(),
        rejected: None,
    };
    let timing = match SlotTiming::from_port(&port) {
        Ok(timing) => timing,
        Err(err) => {
            error!(port = port.index, error = %err, "raw files left unsplit");
            report.rejected = Some(err.to_string());
            return Ok(report);
        }
    };

    let basename = port.basename(dir);
    let passes = port
        .rx_files
        .iter()
        .enumerate()
        .map(|(idx, file)| (file.clone(), format!("-rx{idx}")))
        .chain(
            port.tx_files
                .iter()
                .enumerate()
                .map(|(idx, file)| (file.clone(), format!("-tx{idx}"))),
        );

    for (raw, suffix) in passes {
        let mut file_base = basename.clone().into_os_string();
        file_base.push(&suffix);
        let file_base = PathBuf::from(file_base);
        let demux = demux.clone();
        let file_report =
            tokio::task::spawn_blocking(move || demux_file(&raw, &file_base, &timing, &demux))
                .await??;
        report.files.push(file_report);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_shape() {
        let config = CaptureConfig {
            dir: PathBuf::from("/data/iq"),
            duration_ms: 250,
            rf_ports: vec![0, 2],
            rx: true,
            ..CaptureConfig::default()
        };
        let value = serde_json::to_value(config.request()).unwrap();
        assert_eq!(
            value,
            json!({
                "message": "trx_iq_dump",
                "duration": 250,
                "rf_port": [0, 2],
                "rx_header": true,
                "rx_filename": "/data/iq/rx%02d",
            })
        );
        assert_eq!(config.reply_timeout(), Duration::from_millis(10_250));
    }

    #[test]
    fn needs_a_direction_and_duration() {
        let mut config = CaptureConfig::default();
        assert!(config.validate().is_err());
        config.tx = true;
        assert!(config.validate().is_ok());
        config.duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn prepare_removes_only_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.bin"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("keep")).unwrap();
        std::fs::write(dir.path().join("keep/inner"), b"y").unwrap();

        let canonical = prepare_output_dir(dir.path()).unwrap();
        assert!(!canonical.join("old.bin").exists());
        assert!(canonical.join("keep/inner").exists());
    }

    #[test]
    fn prepare_rejects_missing_and_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            prepare_output_dir(&dir.path().join("missing")),
            Err(CaptureError::OutputDir { .. })
        ));
        let file = dir.path().join("plain");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            prepare_output_dir(&file),
            Err(CaptureError::OutputDir { .. })
        ));
    }
}

//! Filters applied to outgoing JSON text before it is parsed.
//!
//! Scripts may use a relaxed syntax understood by an external templater
//! (`json_util`) and `%name%` placeholders filled from `-D name=value`
//! defines.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command as ProcessCommand;

use crate::error::{Result, SessionError};
use crate::message::{parse_batch, Message};

/// Places searched for the templater when none is configured.
pub const FILTER_SEARCH_PATHS: &[&str] = &["json_util", "../json_util", "../ots/json_util"];

/// Transform applied to outgoing message text.
pub trait MessageFilter: Send + Sync {
    fn apply(&self, text: String) -> impl Future<Output = Result<String>> + Send;
}

/// Ordered `name=value` substitutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defines {
    entries: Vec<(String, String)>,
}

impl Defines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=value`. A later define of the same name replaces the earlier one.
    pub fn add(&mut self, spec: &str) -> Result<()> {
        let (name, value) = spec
            .split_once('=')
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| SessionError::Protocol(format!("invalid define '{spec}'")))?;
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Replace every `%name%` occurrence.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (name, value) in self.iter() {
            out = out.replace(&format!("%{name}%"), value);
        }
        out
    }
}

/// `%name%` substitution.
#[derive(Debug, Clone, Default)]
pub struct DefineFilter {
    pub defines: Defines,
}

impl MessageFilter for DefineFilter {
    async fn apply(&self, text: String) -> Result<String> {
        Ok(self.defines.substitute(&text))
    }
}

/// External templater fed on stdin.
///
/// Invoked as `<program> [-D name=value]... -i 0 dump -`.
#[derive(Debug, Clone)]
pub struct ExternalFilter {
    program: PathBuf,
    defines: Defines,
}

impl ExternalFilter {
    pub fn new(program: impl Into<PathBuf>, defines: Defines) -> Self {
        Self {
            program: program.into(),
            defines,
        }
    }

    /// Look for the templater in the default locations.
    pub fn discover(defines: &Defines) -> Option<Self> {
        discover_in(Path::new("."), defines)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (name, value) in self.defines.iter() {
            args.push("-D".to_string());
            args.push(format!("{name}={value}"));
        }
        args.extend(["-i", "0", "dump", "-"].map(String::from));
        args
    }
}

fn discover_in(base: &Path, defines: &Defines) -> Option<ExternalFilter> {
    FILTER_SEARCH_PATHS
        .iter()
        .map(|candidate| base.join(candidate))
        .find(|path| path.is_file())
        .map(|program| {
            tracing::debug!(program = %program.display(), "using external message filter");
            ExternalFilter::new(program, defines.clone())
        })
}

impl MessageFilter for ExternalFilter {
    async fn apply(&self, text: String) -> Result<String> {
        let mut child = ProcessCommand::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Protocol("filter stdin unavailable".to_string()))?;
        let feed = async move {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;

        if !output.status.success() {
            return Err(SessionError::Filter {
                program: self.program.display().to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|err| SessionError::Protocol(format!("filter output is not UTF-8: {err}")))
    }
}

/// Run outgoing text through the templater (if any), then the defines,
/// and parse the result into a batch.
pub async fn prepare_batch(
    text: &str,
    external: Option<&ExternalFilter>,
    defines: &DefineFilter,
) -> Result<Vec<Message>> {
    let mut text = text.to_string();
    if let Some(external) = external {
        text = external.apply(text).await?;
    }
    let text = defines.apply(text).await?;
    parse_batch(&text)
}

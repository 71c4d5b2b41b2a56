use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::codec::BinaryEvent;
use crate::error::Result;

/// Sink label that receives every event.
pub const ALL_LABELS: &str = "all";

/// Files that record side-channel events, selected by label.
///
/// Each record is the L2 length prefix followed by the payload, so the
/// file can be split again without the JSON headers.
#[derive(Debug, Default)]
pub struct EventSinks {
    files: Vec<(PathBuf, File)>,
    routes: Vec<(String, usize)>,
}

impl EventSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events with `label` (or every event for [`ALL_LABELS`]) to `path`.
    ///
    /// Routes naming the same path share one truncated file handle.
    pub fn add(&mut self, label: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let index = match self.files.iter().position(|(p, _)| p == path) {
            Some(index) => index,
            None => {
                self.files.push((path.to_path_buf(), File::create(path)?));
                self.files.len() - 1
            }
        };
        self.routes.push((label.into(), index));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Write `event` to every matching sink. Returns the number of files written.
    ///
    /// A file reached through several matching routes gets the event once.
    pub fn dispatch(&mut self, event: &BinaryEvent) -> Result<usize> {
        let mut targets: Vec<usize> = self
            .routes
            .iter()
            .filter(|(label, _)| label == ALL_LABELS || label == event.label())
            .map(|(_, index)| *index)
            .collect();
        targets.sort_unstable();
        targets.dedup();

        let prefix = (event.payload.len() as u32).to_le_bytes();
        for &index in &targets {
            let file = &mut self.files[index].1;
            file.write_all(&prefix)?;
            file.write_all(&event.payload)?;
        }
        Ok(targets.len())
    }
}

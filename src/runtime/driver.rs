//! Replays a recorded session into a [`StageRuntime`].
//!
//! Input is newline-delimited JSON, one `{"atMs": .., "event": {..}}` object
//! per line, with offsets measured from session start. Blank lines and lines
//! starting with `#` are skipped.

use std::io::BufRead;
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::{StageEvent, StageRuntime};
use crate::{Result, StageError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLine {
    pub at_ms: u64,
    pub event: StageEvent,
}

pub struct ScriptDriver {
    runtime: StageRuntime,
}

impl ScriptDriver {
    pub fn new(runtime: StageRuntime) -> Self {
        Self { runtime }
    }

    /// Decode every line up front so a malformed script never half-applies.
    pub fn parse(reader: impl BufRead) -> Result<Vec<(Duration, StageEvent)>> {
        let mut events = Vec::new();
        let mut last_ms = 0u64;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed: ScriptLine =
                serde_json::from_str(trimmed).map_err(|err| StageError::Script {
                    line: idx + 1,
                    reason: err.to_string(),
                })?;
            if parsed.at_ms < last_ms {
                return Err(StageError::Script {
                    line: idx + 1,
                    reason: format!("time went backwards ({} < {})", parsed.at_ms, last_ms),
                });
            }
            last_ms = parsed.at_ms;
            events.push((Duration::from_millis(parsed.at_ms), parsed.event));
        }
        Ok(events)
    }

    pub fn replay(mut self, reader: impl BufRead, start: Instant) -> Result<StageRuntime> {
        let events = Self::parse(reader)?;
        self.runtime.run_scripted(start, events)?;
        Ok(self.runtime)
    }
}

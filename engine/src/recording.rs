//! Event recording
//!
//! Persists device events as JSON Lines, one directory per session:
//!
//! ```text
//! <data_dir>/<session_id>/session.json
//! <data_dir>/<session_id>/events.jsonl
//! ```

use crate::{DeviceEvent, EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Metadata of one recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state_changes: usize,
    pub status_changes: usize,
    /// Events per device id
    #[serde(default)]
    pub devices: BTreeMap<String, usize>,
}

impl RecordingSession {
    fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", now.format("%Y%m%d_%H%M%S_%3f")),
            name: name.to_string(),
            start_time: now,
            end_time: None,
            state_changes: 0,
            status_changes: 0,
            devices: BTreeMap::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.state_changes + self.status_changes
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }

    fn count(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::StateChanged { .. } => self.state_changes += 1,
            DeviceEvent::StatusChanged { .. } => self.status_changes += 1,
        }
        *self.devices.entry(event.device().to_string()).or_default() += 1;
    }
}

pub struct EventRecorder {
    base_path: PathBuf,
    session: Option<RecordingSession>,
    writer: Option<BufWriter<File>>,
}

fn recording_err(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Recording(format!("{}: {}", context, err))
}

impl EventRecorder {
    pub fn new(base_path: &Path) -> Result<Self> {
        create_dir_all(base_path).map_err(|e| recording_err("Failed to create data directory", e))?;

        Ok(Self {
            base_path: base_path.to_path_buf(),
            session: None,
            writer: None,
        })
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Start a new session, ending the current one first
    pub fn start_session(&mut self, name: &str) -> Result<&RecordingSession> {
        self.end_session()?;

        let session = RecordingSession::new(name);
        let session_path = self.base_path.join(&session.id);
        create_dir_all(&session_path)
            .map_err(|e| recording_err("Failed to create session directory", e))?;

        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(session_path.join("events.jsonl"))
            .map_err(|e| recording_err("Failed to open event log", e))?;

        self.write_metadata(&session)?;
        self.writer = Some(BufWriter::new(events));

        tracing::info!("Recording session started: {} ({})", name, session.id);
        Ok(&*self.session.insert(session))
    }

    /// Finish the current session; returns it if there was one
    pub fn end_session(&mut self) -> Result<Option<RecordingSession>> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => return Ok(None),
        };
        session.end_time = Some(Utc::now());

        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| recording_err("Flush error", e))?;
        }
        self.write_metadata(&session)?;

        tracing::info!(
            "Recording session ended: {} ({} events)",
            session.name,
            session.event_count()
        );
        Ok(Some(session))
    }

    /// Append an event to the current session; no-op without a session
    pub fn record_event(&mut self, event: &DeviceEvent) -> Result<()> {
        let (writer, session) = match (self.writer.as_mut(), self.session.as_mut()) {
            (Some(writer), Some(session)) => (writer, session),
            _ => return Ok(()),
        };

        let line = serde_json::to_string(event).map_err(|e| recording_err("Serialization error", e))?;
        writeln!(writer, "{}", line).map_err(|e| recording_err("Write error", e))?;
        session.count(event);

        // Status changes are rare and worth having on disk immediately
        if matches!(event, DeviceEvent::StatusChanged { .. }) {
            writer.flush().map_err(|e| recording_err("Flush error", e))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| recording_err("Flush error", e))?;
        }
        Ok(())
    }

    /// All sessions, newest first
    pub fn list_sessions(&self) -> Result<Vec<RecordingSession>> {
        let mut sessions = Vec::new();

        let entries = std::fs::read_dir(&self.base_path).map_err(|e| recording_err("Read dir error", e))?;
        for entry in entries {
            let path = entry.map_err(|e| recording_err("Entry error", e))?.path();
            let metadata_path = path.join("session.json");
            if !metadata_path.is_file() {
                continue;
            }

            let content = std::fs::read_to_string(&metadata_path).map_err(|e| recording_err("Read error", e))?;
            match serde_json::from_str::<RecordingSession>(&content) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping unreadable session {:?}: {}", metadata_path, e),
            }
        }

        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    /// Events of a session in recording order; unparsable lines are skipped
    pub fn load_events(&self, session_id: &str) -> Result<Vec<DeviceEvent>> {
        let path = self.base_path.join(session_id).join("events.jsonl");
        let file = File::open(&path).map_err(|e| recording_err("Open error", e))?;

        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| recording_err("Read error", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DeviceEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping line {} of {}: {}", number + 1, session_id, e),
            }
        }
        Ok(events)
    }

    /// Write a session and its events as one JSON document
    pub fn export_session(&self, session_id: &str, output_path: &Path) -> Result<()> {
        let metadata_path = self.base_path.join(session_id).join("session.json");
        let content = std::fs::read_to_string(&metadata_path).map_err(|e| recording_err("Read error", e))?;
        let session: RecordingSession =
            serde_json::from_str(&content).map_err(|e| recording_err("Parse error", e))?;

        let export = SessionExport {
            session,
            events: self.load_events(session_id)?,
            exported_at: Utc::now(),
            version: "1.0".to_string(),
        };

        let json = serde_json::to_string_pretty(&export).map_err(|e| recording_err("Serialize error", e))?;
        std::fs::write(output_path, json).map_err(|e| recording_err("Write error", e))?;

        tracing::info!("Exported session {} to {:?}", session_id, output_path);
        Ok(())
    }

    fn write_metadata(&self, session: &RecordingSession) -> Result<()> {
        let path = self.base_path.join(&session.id).join("session.json");
        let json = serde_json::to_string_pretty(session).map_err(|e| recording_err("Serialize error", e))?;
        std::fs::write(path, json).map_err(|e| recording_err("Failed to write metadata", e))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionExport {
    session: RecordingSession,
    events: Vec<DeviceEvent>,
    exported_at: DateTime<Utc>,
    version: String,
}

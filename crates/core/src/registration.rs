use crate::address::Destination;
use crate::directory::{self, Directory, HostRecord};
use anonjump_common::{JumpError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A submission awaiting operator review
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRegistration {
    pub name: String,
    pub destination: String,
    pub description: String,
}

/// Host registrations submitted through the web form
///
/// Submissions land in a queue file next to the published hosts file and are
/// never served; an operator promotes them by hand. Descriptions are kept in
/// a `.notes` file beside the queue, one `name=description` line each.
pub struct RegistrationQueue {
    path: PathBuf,
    notes_path: PathBuf,
    state: Mutex<QueueState>,
}

struct QueueState {
    directory: Arc<Directory>,
    notes: Directory,
}

impl RegistrationQueue {
    /// Open the queue, restoring entries from an existing queue file
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let notes_path = path.with_extension("notes");

        Ok(Self {
            state: Mutex::new(QueueState {
                directory: Arc::new(load_or_empty(&path).await),
                notes: load_or_empty(&notes_path).await,
            }),
            path,
            notes_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate and queue a registration
    pub async fn submit(&self, name: &str, destination: &str, description: &str) -> Result<()> {
        let name = validate_name(name)?;
        let destination = destination.trim();
        if has_control(destination) {
            return Err(JumpError::validation(format!(
                "destination for {} contains control characters",
                name
            )));
        }
        Destination::parse(destination)
            .map_err(|e| JumpError::validation(format!("destination for {}: {}", name, e)))?;

        let description = description.trim();
        if has_control(description) {
            return Err(JumpError::validation(format!(
                "description for {} contains control characters",
                name
            )));
        }

        let mut state = self.state.lock().await;
        let updated = state
            .directory
            .with_record(HostRecord::new(name.clone(), destination));
        directory::persist(&updated, &self.path).await?;
        state.directory = Arc::new(updated);

        if !description.is_empty() {
            let notes = state
                .notes
                .with_record(HostRecord::new(name.clone(), description));
            directory::persist(&notes, &self.notes_path).await?;
            state.notes = notes;
        }

        info!("Queued registration of {} for review", name);
        Ok(())
    }

    pub async fn pending(&self) -> Arc<Directory> {
        self.state.lock().await.directory.clone()
    }

    /// Queued registrations with their descriptions
    pub async fn submissions(&self) -> Vec<PendingRegistration> {
        let state = self.state.lock().await;
        state
            .directory
            .records()
            .iter()
            .map(|record| PendingRegistration {
                name: record.name.clone(),
                destination: record.destination.clone(),
                description: state
                    .notes
                    .lookup(&record.name)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect()
    }
}

async fn load_or_empty(path: &Path) -> Directory {
    match directory::load(path).await {
        Ok(directory) => directory,
        Err(e) => {
            warn!("Starting with an empty queue, {:?} is unreadable: {}", path, e);
            Directory::new()
        }
    }
}

/// Hostnames must fit on a hosts file line unambiguously
fn validate_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(JumpError::validation("empty host name"));
    }
    if name.contains('=') || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(JumpError::validation(format!("invalid host name: {:?}", name)));
    }
    Ok(name)
}

fn has_control(text: &str) -> bool {
    text.chars().any(char::is_control)
}

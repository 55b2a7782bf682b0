//! Server-side collaborators that are not networking or world storage:
//! moderation effects, announcements and the HTTP update source.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ember_config::Config;
use ember_lifecycle::{
    CollaboratorResult, ModerationActions, ModerationWatches, SessionRegistry, UpdateSource,
};
use ember_scheduler::ExpiryRecord;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::net::Connections;
use crate::worlds::WorldStore;

/// Everything the startup jobs need to reach.
pub(crate) struct Host {
    pub config: Config,
    pub connections: Arc<Connections>,
    pub worlds: Arc<WorldStore>,
    pub runtime: Handle,
    pub moderation: Mutex<Option<ModerationWatches>>,
}

/// Applies expired moderation states by telling the players.
pub(crate) struct ModerationNotices {
    sessions: Arc<dyn SessionRegistry>,
}

impl ModerationNotices {
    pub(crate) fn new(sessions: Arc<dyn SessionRegistry>) -> Self {
        Self { sessions }
    }
}

impl ModerationActions for ModerationNotices {
    fn revoke_temp_rank(&self, record: &ExpiryRecord) -> CollaboratorResult {
        let old_rank = record.extra.first().map(String::as_str).unwrap_or("guest");
        let temp_rank = record.extra.get(1).map(String::as_str).unwrap_or("temporary");
        info!(
            "Temp rank {} of {} expired, back to {}",
            temp_rank, record.subject, old_rank
        );
        self.sessions.broadcast(&format!(
            "{}'s temporary {} rank has expired",
            record.subject, temp_rank
        ));
        Ok(())
    }

    fn unmute(&self, record: &ExpiryRecord) -> CollaboratorResult {
        self.sessions
            .broadcast(&format!("{} is no longer muted", record.subject));
        Ok(())
    }

    fn unfreeze(&self, record: &ExpiryRecord) -> CollaboratorResult {
        self.sessions
            .broadcast(&format!("{} is no longer frozen", record.subject));
        Ok(())
    }
}

/// Messages broadcast at random on the announcement timer.
#[derive(Debug, Default)]
pub(crate) struct Announcements {
    messages: Vec<String>,
}

impl Announcements {
    /// Load one message per non-empty line. A missing file means no messages.
    pub(crate) fn load(path: &Path) -> std::io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::from_lines(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn from_lines(content: &str) -> Self {
        Self {
            messages: content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    /// Broadcast one random message, if there is anyone to read it.
    pub(crate) fn announce(&self, connections: &Connections) -> bool {
        if connections.session_count() == 0 {
            return false;
        }
        let Some(message) = self.messages.choose(&mut rand::thread_rng()) else {
            return false;
        };
        connections.broadcast(message);
        true
    }
}

/// Reads the latest version from a plain-text URL.
pub(crate) struct HttpVersionSource {
    url: String,
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpVersionSource {
    pub(crate) fn new(url: impl Into<String>, runtime: Handle) -> CollaboratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("ember/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            runtime,
        })
    }
}

impl UpdateSource for HttpVersionSource {
    fn latest_version(&self) -> CollaboratorResult<String> {
        debug!("Checking {} for updates", self.url);
        // Runs on a scheduler thread, outside the runtime.
        let body = self.runtime.block_on(async {
            self.client
                .get(&self.url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        })?;
        Ok(body.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Chat {
        lines: Mutex<Vec<String>>,
    }

    impl SessionRegistry for Chat {
        fn all_active(&self) -> Vec<u64> {
            Vec::new()
        }

        fn disconnect(&self, _session: u64, _reason: &str) -> CollaboratorResult {
            Ok(())
        }

        fn broadcast(&self, message: &str) {
            self.lines.lock().push(message.to_string());
        }
    }

    #[test]
    fn test_moderation_notices() {
        let chat = Arc::new(Chat::default());
        let notices = ModerationNotices::new(chat.clone());
        let record = ExpiryRecord::parse("alice console 100 200 guest builder").unwrap();

        notices.revoke_temp_rank(&record).unwrap();
        notices.unmute(&record).unwrap();
        notices.unfreeze(&record).unwrap();

        assert_eq!(
            *chat.lines.lock(),
            vec![
                "alice's temporary builder rank has expired",
                "alice is no longer muted",
                "alice is no longer frozen",
            ]
        );
    }

    #[test]
    fn test_announcements_load() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Announcements::load(&dir.path().join("none.txt")).unwrap().len(), 0);

        let path = dir.path().join("messages.txt");
        fs::write(&path, "Welcome!\n\n  Be nice  \n").unwrap();
        let announcements = Announcements::load(&path).unwrap();
        assert_eq!(announcements.messages, vec!["Welcome!", "Be nice"]);
    }

    #[test]
    fn test_announce_needs_sessions() {
        let connections = Connections::new("Ember", "");
        let announcements = Announcements::from_lines("hello");
        assert!(!announcements.announce(&connections));
        assert!(!Announcements::default().announce(&connections));
    }
}

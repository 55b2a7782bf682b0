//! JSON-backed world store.
//!
//! Each world is `<worlds_dir>/<name>.json`. Block changes made by players are
//! buffered in memory and appended to `<worlds_dir>/<name>.changes` when the
//! change log is saved. A world with buffered changes is reported as changed
//! until it is saved again.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use ember_lifecycle::{CollaboratorResult, LoadedWorld, PersistenceStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Highest physics level.
pub(crate) const MAX_PHYSICS: u8 = 5;

/// On-disk world description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WorldFile {
    pub name: String,
    #[serde(default)]
    pub physics: u8,
    #[serde(default = "default_save_changes")]
    pub save_changes: bool,
    pub width: u16,
    pub height: u16,
    pub length: u16,
}

fn default_save_changes() -> bool {
    true
}

impl WorldFile {
    /// A freshly generated flat world.
    pub(crate) fn generate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            physics: 0,
            save_changes: true,
            width: 128,
            height: 64,
            length: 128,
        }
    }
}

struct WorldState {
    file: WorldFile,
    loaded_order: u64,
    changed: AtomicBool,
    changes: Mutex<Vec<String>>,
}

impl WorldState {
    fn to_loaded(&self) -> LoadedWorld {
        LoadedWorld {
            changed: self.changed.load(Ordering::SeqCst),
            ..to_loaded(&self.file)
        }
    }
}

/// World names become file names, so they may not leave the worlds directory.
pub(crate) fn check_world_name(name: &str) -> CollaboratorResult {
    let valid = !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', ':', '\0']);
    if valid {
        Ok(())
    } else {
        Err(format!("invalid world name {:?}", name).into())
    }
}

/// Loaded worlds and their files.
pub(crate) struct WorldStore {
    dir: PathBuf,
    loaded: DashMap<String, WorldState>,
    load_counter: AtomicU64,
}

impl WorldStore {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: DashMap::new(),
            load_counter: AtomicU64::new(0),
        }
    }

    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    fn world_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn change_log_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.changes", name))
    }

    pub(crate) fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(&Self::key(name))
    }

    /// Load a world from disk. Loading an already loaded world is a no-op.
    pub(crate) fn load(&self, name: &str, physics: Option<u8>) -> CollaboratorResult<LoadedWorld> {
        check_world_name(name)?;
        if let Some(state) = self.loaded.get(&Self::key(name)) {
            return Ok(state.to_loaded());
        }

        let path = self.world_path(name);
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("cannot read world {}: {}", path.display(), e))?;
        let mut file: WorldFile = serde_json::from_str(&content)?;
        if let Some(physics) = physics {
            file.physics = physics.min(MAX_PHYSICS);
        }

        info!("Loaded world {} (physics {})", file.name, file.physics);
        Ok(self.insert(file))
    }

    /// Load a world, generating and saving a new one if it does not exist.
    pub(crate) fn load_or_generate(&self, name: &str) -> CollaboratorResult<LoadedWorld> {
        check_world_name(name)?;
        if self.is_loaded(name) || self.world_path(name).exists() {
            return self.load(name, None);
        }

        info!("World {} does not exist, generating it", name);
        let file = WorldFile::generate(name);
        write_world(&self.world_path(name), &file)?;
        Ok(self.insert(file))
    }

    fn insert(&self, file: WorldFile) -> LoadedWorld {
        let loaded = to_loaded(&file);
        let order = self.load_counter.fetch_add(1, Ordering::Relaxed);
        self.loaded.insert(
            Self::key(&file.name),
            WorldState {
                file,
                loaded_order: order,
                changed: AtomicBool::new(false),
                changes: Mutex::new(Vec::new()),
            },
        );
        loaded
    }

    /// Buffer a block change for the world's change log and mark the world
    /// changed. Returns `false` when the world is not loaded.
    pub(crate) fn record_change(&self, world: &str, change: impl Into<String>) -> bool {
        match self.loaded.get(&Self::key(world)) {
            Some(state) => {
                state.changes.lock().push(change.into());
                state.changed.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Number of block changes waiting for the change log.
    pub(crate) fn pending_changes(&self, world: &str) -> usize {
        self.loaded
            .get(&Self::key(world))
            .map_or(0, |state| state.changes.lock().len())
    }
}

fn to_loaded(file: &WorldFile) -> LoadedWorld {
    LoadedWorld {
        name: file.name.clone(),
        physics: file.physics,
        save_changes: file.save_changes,
        changed: false,
    }
}

fn write_world(path: &Path, file: &WorldFile) -> CollaboratorResult {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl PersistenceStore for WorldStore {
    fn loaded_worlds(&self) -> Vec<LoadedWorld> {
        let mut worlds: Vec<(u64, LoadedWorld)> = self
            .loaded
            .iter()
            .map(|s| (s.loaded_order, s.to_loaded()))
            .collect();
        worlds.sort_by_key(|(order, _)| *order);
        worlds.into_iter().map(|(_, world)| world).collect()
    }

    fn save(&self, world: &LoadedWorld) -> CollaboratorResult {
        let state = self
            .loaded
            .get(&Self::key(&world.name))
            .ok_or_else(|| format!("world {} is not loaded", world.name))?;
        write_world(&self.world_path(&state.file.name), &state.file)?;
        state.changed.store(false, Ordering::SeqCst);
        debug!("Saved world {}", world.name);
        Ok(())
    }

    fn save_change_log(&self, world: &LoadedWorld) -> CollaboratorResult {
        let Some(state) = self.loaded.get(&Self::key(&world.name)) else {
            return Ok(());
        };
        let mut changes = state.changes.lock();
        if changes.is_empty() {
            return Ok(());
        }

        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.change_log_path(&state.file.name))?;
        for change in changes.iter() {
            writeln!(log, "{}", change)?;
        }
        log.flush()?;
        debug!("Saved {} block change(s) of {}", changes.len(), world.name);
        changes.clear();
        Ok(())
    }
}

/// Parse the autoload list: `name=physics` per line, blank lines and `#`
/// comments ignored. The main world is skipped (it is loaded on its own).
pub(crate) fn parse_autoload(content: &str, main_world: &str) -> Vec<(String, u8)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (name, physics) = match line.split_once('=') {
                Some((name, physics)) => (name.trim(), physics.trim().parse().unwrap_or(0)),
                None => (line, 0),
            };
            if name.is_empty() || name.eq_ignore_ascii_case(main_world) {
                return None;
            }
            Some((name.to_string(), physics.min(MAX_PHYSICS)))
        })
        .collect()
}

use crate::display::{Mode, Orientation, ScalingMode, DEFAULT_DPI_SCALE};
use crate::error::PersistenceError;
use crate::hotkey::parse_hotkey;
use crate::settings::Settings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const SETTINGS_DIR_NAME: &str = "DisplayHotKeys";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Stored record of one slot. A missing `mode` means "the display's current
/// mode at load time".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSettings {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default = "default_dpi_scale")]
    pub dpi_scale: u32,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub scaling_mode: ScalingMode,
    /// Written as codes. Hand-edited files may also use a combo string such
    /// as `"Ctrl+Alt+1"`.
    #[serde(default, deserialize_with = "deserialize_keys")]
    pub keys: Vec<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeysWire {
    Codes(Vec<u32>),
    Combo(String),
}

fn deserialize_keys<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match KeysWire::deserialize(deserializer)? {
        KeysWire::Codes(codes) => codes,
        KeysWire::Combo(combo) if combo.trim().is_empty() => Vec::new(),
        KeysWire::Combo(combo) => parse_hotkey(&combo).unwrap_or_else(|| {
            tracing::warn!(combo = %combo, "unrecognised hotkey in settings; slot left unbound");
            Vec::new()
        }),
    })
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            mode: None,
            dpi_scale: default_dpi_scale(),
            orientation: Orientation::Inherit,
            scaling_mode: ScalingMode::default(),
            keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// Number of active slots.
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
    #[serde(default = "default_display_orientation")]
    pub orientation: Orientation,
    #[serde(default)]
    pub slots: Vec<SlotSettings>,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            orientation: default_display_orientation(),
            slots: Vec::new(),
        }
    }
}

fn default_dpi_scale() -> u32 {
    DEFAULT_DPI_SCALE
}

fn default_slot_count() -> usize {
    1
}

fn default_display_orientation() -> Orientation {
    Orientation::Normal
}

/// Whole settings file: application flags plus one entry per display id ever
/// seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub application: Settings,
    #[serde(default)]
    pub displays: BTreeMap<String, DisplaySettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayField {
    SlotCount(usize),
    Orientation(Orientation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotField {
    Mode(Mode),
    DpiScale(u32),
    Orientation(Orientation),
    ScalingMode(ScalingMode),
    Keys(Vec<u32>),
}

/// Key-value mirror of the profile tree. Implementations hold no business
/// rules; every setter is written through before it returns.
pub trait SettingsStore: Send + Sync {
    fn display(&self, id: &str) -> Option<DisplaySettings>;
    fn display_ids(&self) -> Vec<String>;
    fn put_display(&self, id: &str, display: DisplaySettings) -> Result<(), PersistenceError>;
    fn set_display_field(&self, id: &str, field: DisplayField) -> Result<(), PersistenceError>;
    fn set_slot_field(&self, id: &str, slot: usize, field: SlotField)
        -> Result<(), PersistenceError>;
    /// Remove a slot record, shifting later slots down.
    fn remove_slot(&self, id: &str, slot: usize) -> Result<(), PersistenceError>;
    /// Drop a display entry entirely. Returns whether one existed.
    fn forget_display(&self, id: &str) -> Result<bool, PersistenceError>;
    fn application(&self) -> Settings;
    fn set_application(&self, settings: Settings) -> Result<(), PersistenceError>;

    fn slot(&self, id: &str, slot: usize) -> Option<SlotSettings> {
        self.display(id)?.slots.get(slot).cloned()
    }
}

fn apply_display_field(file: &mut SettingsFile, id: &str, field: DisplayField) {
    let display = file.displays.entry(id.to_string()).or_default();
    match field {
        DisplayField::SlotCount(count) => display.slot_count = count,
        DisplayField::Orientation(orientation) => display.orientation = orientation,
    }
}

fn apply_slot_field(file: &mut SettingsFile, id: &str, slot: usize, field: SlotField) {
    let display = file.displays.entry(id.to_string()).or_default();
    if display.slots.len() <= slot {
        display.slots.resize_with(slot + 1, SlotSettings::default);
    }
    let record = &mut display.slots[slot];
    match field {
        SlotField::Mode(mode) => record.mode = Some(mode),
        SlotField::DpiScale(scale) => record.dpi_scale = scale,
        SlotField::Orientation(orientation) => record.orientation = orientation,
        SlotField::ScalingMode(scaling) => record.scaling_mode = scaling,
        SlotField::Keys(keys) => record.keys = keys,
    }
}

fn apply_remove_slot(file: &mut SettingsFile, id: &str, slot: usize) {
    if let Some(display) = file.displays.get_mut(id) {
        if slot < display.slots.len() {
            display.slots.remove(slot);
        }
    }
}

/// Settings store backed by a JSON file.
///
/// The file is rewritten in full on every mutation, so a failed write is
/// retried implicitly by the next one.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    file: Mutex<SettingsFile>,
}

impl JsonSettingsStore {
    /// Open the settings file, starting empty when it does not exist. A file
    /// that cannot be parsed is moved aside to `*.corrupt`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = load_file(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> SettingsFile {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, SettingsFile> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, f: impl FnOnce(&mut SettingsFile)) -> Result<(), PersistenceError> {
        let mut file = self.lock();
        f(&mut file);
        save_file(&self.path, &file).map_err(|err| {
            tracing::error!(?err, path = %self.path.display(), "failed to write settings");
            PersistenceError::WriteFailed {
                path: self.path.clone(),
                reason: format!("{err:#}"),
            }
        })
    }
}

impl SettingsStore for JsonSettingsStore {
    fn display(&self, id: &str) -> Option<DisplaySettings> {
        self.lock().displays.get(id).cloned()
    }

    fn display_ids(&self) -> Vec<String> {
        self.lock().displays.keys().cloned().collect()
    }

    fn put_display(&self, id: &str, display: DisplaySettings) -> Result<(), PersistenceError> {
        self.mutate(|file| {
            file.displays.insert(id.to_string(), display);
        })
    }

    fn set_display_field(&self, id: &str, field: DisplayField) -> Result<(), PersistenceError> {
        self.mutate(|file| apply_display_field(file, id, field))
    }

    fn set_slot_field(
        &self,
        id: &str,
        slot: usize,
        field: SlotField,
    ) -> Result<(), PersistenceError> {
        self.mutate(|file| apply_slot_field(file, id, slot, field))
    }

    fn remove_slot(&self, id: &str, slot: usize) -> Result<(), PersistenceError> {
        self.mutate(|file| apply_remove_slot(file, id, slot))
    }

    fn forget_display(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut existed = false;
        self.mutate(|file| existed = file.displays.remove(id).is_some())?;
        Ok(existed)
    }

    fn application(&self) -> Settings {
        self.lock().application.clone()
    }

    fn set_application(&self, settings: Settings) -> Result<(), PersistenceError> {
        self.mutate(|file| file.application = settings)
    }
}

/// Store that never touches the disk.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    file: Mutex<SettingsFile>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(file: SettingsFile) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    pub fn snapshot(&self) -> SettingsFile {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, SettingsFile> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn display(&self, id: &str) -> Option<DisplaySettings> {
        self.lock().displays.get(id).cloned()
    }

    fn display_ids(&self) -> Vec<String> {
        self.lock().displays.keys().cloned().collect()
    }

    fn put_display(&self, id: &str, display: DisplaySettings) -> Result<(), PersistenceError> {
        self.lock().displays.insert(id.to_string(), display);
        Ok(())
    }

    fn set_display_field(&self, id: &str, field: DisplayField) -> Result<(), PersistenceError> {
        apply_display_field(&mut self.lock(), id, field);
        Ok(())
    }

    fn set_slot_field(
        &self,
        id: &str,
        slot: usize,
        field: SlotField,
    ) -> Result<(), PersistenceError> {
        apply_slot_field(&mut self.lock(), id, slot, field);
        Ok(())
    }

    fn remove_slot(&self, id: &str, slot: usize) -> Result<(), PersistenceError> {
        apply_remove_slot(&mut self.lock(), id, slot);
        Ok(())
    }

    fn forget_display(&self, id: &str) -> Result<bool, PersistenceError> {
        Ok(self.lock().displays.remove(id).is_some())
    }

    fn application(&self) -> Settings {
        self.lock().application.clone()
    }

    fn set_application(&self, settings: Settings) -> Result<(), PersistenceError> {
        self.lock().application = settings;
        Ok(())
    }
}

/// `Documents/DisplayHotKeys/settings.json`, or next to the executable when
/// no documents folder is known.
pub fn default_settings_path() -> Result<PathBuf> {
    if let Some(docs) = dirs_next::document_dir() {
        return Ok(docs.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME));
    }
    let exe_path = std::env::current_exe().context("resolve current executable")?;
    settings_path_from_exe_path(&exe_path)
}

pub fn settings_path_from_exe_path(exe_path: &Path) -> Result<PathBuf> {
    let parent = exe_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable path has no parent: {}", exe_path.display()))?;
    Ok(parent.join(SETTINGS_FILE_NAME))
}

fn load_file(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read settings file {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(SettingsFile::default());
    }

    match serde_json::from_str(&content) {
        Ok(file) => Ok(file),
        Err(err) => {
            let aside = path.with_extension("corrupt");
            tracing::warn!(?err, moved_to = %aside.display(), "settings file is corrupt; starting fresh");
            std::fs::rename(path, &aside)
                .with_context(|| format!("move corrupt settings file {}", path.display()))?;
            Ok(SettingsFile::default())
        }
    }
}

fn save_file(path: &Path, file: &SettingsFile) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create settings folder {}", dir.display()))?;

    let json = serde_json::to_string_pretty(file).context("serialize settings")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temporary file in {}", dir.display()))?;
    tmp.write_all(json.as_bytes()).context("write settings")?;
    tmp.as_file().sync_all().context("flush settings")?;
    tmp.persist(path)
        .with_context(|| format!("replace settings file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_resolved_next_to_executable() {
        let exe = Path::new("/tmp/app/bin/display_hotkeys");
        let path = settings_path_from_exe_path(exe).expect("path");
        assert_eq!(path, Path::new("/tmp/app/bin").join(SETTINGS_FILE_NAME));
    }

    #[test]
    fn missing_keys_take_defaults() {
        let display: DisplaySettings = serde_json::from_str("{}").unwrap();
        assert_eq!(display.slot_count, 1);
        assert_eq!(display.orientation, Orientation::Normal);
        let slot: SlotSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(slot, SlotSettings::default());
        assert_eq!(slot.dpi_scale, 100);
    }

    #[test]
    fn slot_field_grows_slot_list() {
        let store = MemorySettingsStore::new();
        store
            .set_slot_field("D1", 2, SlotField::DpiScale(150))
            .unwrap();
        let display = store.display("D1").unwrap();
        assert_eq!(display.slots.len(), 3);
        assert_eq!(display.slots[2].dpi_scale, 150);
        assert_eq!(display.slots[0], SlotSettings::default());
    }

    #[test]
    fn remove_slot_shifts_later_slots() {
        let store = MemorySettingsStore::new();
        store.set_slot_field("D1", 0, SlotField::Keys(vec![65])).unwrap();
        store.set_slot_field("D1", 1, SlotField::Keys(vec![66])).unwrap();
        store.remove_slot("D1", 0).unwrap();
        assert_eq!(store.slot("D1", 0).unwrap().keys, vec![66]);
        assert!(store.slot("D1", 1).is_none());
    }
}

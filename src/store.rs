//! Source configuration store.
//!
//! Persists 48 fixed slots in a JSON file:
//!
//! ```json
//! { "cameras": [ { "enabled": false, "source_type": "rtsp", "url": "", "device": 0, "name": "Camera 1" } ] }
//! ```
//!
//! An absent file is created with every slot disabled. A corrupt file is
//! replaced in memory by the same defaults (and logged); it is only
//! overwritten on the next explicit save.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::source::{default_name, validate_index, SourceDescriptor, SourceKind};
use crate::MAX_SOURCES;

pub const DEFAULT_STORE_PATH: &str = "camera_config.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub source_type: SourceKind,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub device: u32,
    #[serde(default)]
    pub name: String,
}

impl SlotRecord {
    fn default_for(index: usize) -> Self {
        Self {
            enabled: false,
            source_type: SourceKind::Network,
            url: String::new(),
            device: 0,
            name: default_name(index),
        }
    }

    fn to_descriptor(&self, index: usize) -> SourceDescriptor {
        let target = match self.source_type {
            SourceKind::Network => self.url.clone(),
            SourceKind::Local => self.device.to_string(),
        };
        let display_name = if self.name.trim().is_empty() {
            default_name(index)
        } else {
            self.name.clone()
        };
        SourceDescriptor {
            enabled: self.enabled,
            kind: self.source_type,
            target,
            display_name,
        }
    }

    /// Keeps the inactive field (url or device) of the previous record so
    /// switching a slot's type back and forth does not lose it.
    fn from_descriptor(desc: &SourceDescriptor, previous: &SlotRecord) -> Result<Self> {
        let (url, device) = match desc.kind {
            SourceKind::Network => (desc.target.clone(), previous.device),
            SourceKind::Local => (previous.url.clone(), desc.device_ordinal()?),
        };
        Ok(Self {
            enabled: desc.enabled,
            source_type: desc.kind,
            url,
            device,
            name: desc.display_name.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    cameras: Vec<SlotRecord>,
}

/// 48-slot source configuration backed by a JSON file.
#[derive(Debug)]
pub struct SourceConfigStore {
    path: PathBuf,
    slots: Vec<SlotRecord>,
}

impl SourceConfigStore {
    /// Load the store, creating the file with defaults when it is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let store = Self {
                path,
                slots: default_slots(),
            };
            store.save()?;
            log::info!(
                "source store {} created with {} disabled slots",
                store.path.display(),
                MAX_SOURCES
            );
            return Ok(store);
        }
        let slots = match read_store_file(&path) {
            Ok(slots) => slots,
            Err(err) => {
                log::error!("failed to read source store: {:#}", err);
                default_slots()
            }
        };
        Ok(Self { path, slots })
    }

    /// In-memory store with all slots disabled. Nothing touches disk until `save`.
    pub fn in_memory(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slots: default_slots(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        let file = StoreFile {
            cameras: self.slots.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("failed to write source store {}", self.path.display()))
    }

    /// Descriptor for a slot. Out-of-range indices get a disabled default.
    pub fn get_descriptor(&self, index: usize) -> SourceDescriptor {
        self.slots
            .get(index)
            .map(|slot| slot.to_descriptor(index))
            .unwrap_or_else(|| SourceDescriptor::disabled(index))
    }

    /// Every slot's descriptor keyed by index.
    pub fn descriptors(&self) -> BTreeMap<usize, SourceDescriptor> {
        (0..MAX_SOURCES)
            .map(|index| (index, self.get_descriptor(index)))
            .collect()
    }

    pub fn record(&self, index: usize) -> Option<&SlotRecord> {
        self.slots.get(index)
    }

    /// Replace a slot and persist the store.
    pub fn set_descriptor(&mut self, index: usize, desc: &SourceDescriptor) -> Result<()> {
        validate_index(index)?;
        if desc.enabled {
            desc.validate()?;
        }
        let record = SlotRecord::from_descriptor(desc, &self.slots[index])?;
        self.slots[index] = record;
        self.save()
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let mut desc = self.get_descriptor(index);
        desc.enabled = enabled;
        self.set_descriptor(index, &desc)
    }

    pub fn enabled_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.enabled).count()
    }
}

fn default_slots() -> Vec<SlotRecord> {
    (0..MAX_SOURCES).map(SlotRecord::default_for).collect()
}

/// Readers polling the store (ingestd) see either the old file or the new
/// one, never a truncated one.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_store_file(path: &Path) -> Result<Vec<SlotRecord>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    let file: StoreFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid source store {}: {}", path.display(), e))?;
    let mut slots = file.cameras;
    if slots.len() > MAX_SOURCES {
        log::warn!(
            "source store {} has {} slots; ignoring slots past {}",
            path.display(),
            slots.len(),
            MAX_SOURCES
        );
        slots.truncate(MAX_SOURCES);
    }
    let present = slots.len();
    slots.extend((present..MAX_SOURCES).map(SlotRecord::default_for));
    Ok(slots)
}

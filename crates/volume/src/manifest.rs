use std::fs;
use std::path::{Path, PathBuf};

use dedupe_index_common::{Geometry, IndexError};
use serde::{Deserialize, Serialize};

use crate::format::FORMAT_VERSION;

/// Persistent volume-level metadata, checked on every open. Mirrors the
/// teacher's `SegmentManager::Manifest`, generalized from "segment list"
/// to "volume identity."
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeManifest {
    pub nonce: u64,
    pub geometry: Geometry,
    pub format_version: u32,
}

impl VolumeManifest {
    pub fn open_or_create(base_dir: &Path, geometry: Geometry, nonce: u64) -> Result<Self, IndexError> {
        fs::create_dir_all(base_dir)?;
        let path = manifest_path(base_dir);
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let manifest: VolumeManifest = serde_json::from_str(&content)
                .map_err(|e| IndexError::CorruptComponent(format!("manifest parse: {e}")))?;
            if manifest.nonce != nonce {
                return Err(IndexError::CorruptComponent(
                    "volume nonce does not match master-index checkpoint".into(),
                ));
            }
            if manifest.geometry != geometry {
                return Err(IndexError::CorruptComponent(
                    "volume geometry does not match requested geometry".into(),
                ));
            }
            if manifest.format_version != FORMAT_VERSION {
                return Err(IndexError::CorruptComponent(format!(
                    "on-disk format version {} does not match {}",
                    manifest.format_version, FORMAT_VERSION
                )));
            }
            Ok(manifest)
        } else {
            let manifest = VolumeManifest {
                nonce,
                geometry,
                format_version: FORMAT_VERSION,
            };
            manifest.save(base_dir)?;
            Ok(manifest)
        }
    }

    pub fn save(&self, base_dir: &Path) -> Result<(), IndexError> {
        let path = manifest_path(base_dir);
        let tmp = base_dir.join("manifest.json.tmp");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| IndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Discard any prior state — used by `make_index(CREATE)`.
    pub fn reset(base_dir: &Path, geometry: Geometry, nonce: u64) -> Result<Self, IndexError> {
        let _ = fs::remove_dir_all(base_dir);
        Self::open_or_create(base_dir, geometry, nonce)
    }
}

fn manifest_path(base_dir: &Path) -> PathBuf {
    base_dir.join("manifest.json")
}

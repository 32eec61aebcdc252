//! File-backed plate persistence with zstd compression.
//!
//! Each plate is written to its own `.plate` file: a fixed header followed by a
//! zstd-compressed bincode payload, validated with CRC32 on load.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crc32fast::Hasher;
use strata_core::PlateCoord;
use tracing::debug;

use crate::{MantleError, PlatePayload, PlateStore};

/// Magic number for plate file identification ("STPL").
const PLATE_MAGIC: u32 = 0x5354_504C;

/// Current plate file format version.
const PLATE_VERSION: u16 = 1;

const HEADER_LEN: usize = 14;

/// Plate file header structure.
#[derive(Debug, Clone)]
struct PlateHeader {
    magic: u32,
    version: u16,
    crc32: u32,
    payload_len: u32,
}

impl PlateHeader {
    fn new(crc32: u32, payload_len: u32) -> Self {
        Self {
            magic: PLATE_MAGIC,
            version: PLATE_VERSION,
            crc32,
            payload_len,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.extend_from_slice(&self.magic.to_le_bytes());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.payload_len.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            anyhow::bail!("Plate header too short");
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != PLATE_MAGIC {
            anyhow::bail!(
                "Invalid plate magic: expected 0x{:08X}, got 0x{:08X}",
                PLATE_MAGIC,
                magic
            );
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PLATE_VERSION {
            anyhow::bail!("Unsupported plate version {version}");
        }
        let crc32 = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let payload_len = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);

        Ok(Self {
            magic,
            version,
            crc32,
            payload_len,
        })
    }
}

/// Plate store writing one compressed file per plate under a directory.
pub struct RegionPlateStore {
    dir: PathBuf,
    compression_level: i32,
}

impl RegionPlateStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create plate directory")?;
        Ok(Self {
            dir,
            compression_level: 3,
        })
    }

    /// Override the zstd level used when writing.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    fn plate_path(&self, coord: PlateCoord) -> PathBuf {
        self.dir.join(format!("p.{}.{}.plate", coord.x, coord.z))
    }

    fn read_plate(&self, path: &Path) -> Result<PlatePayload> {
        let mut file = File::open(path).context("Failed to open plate file")?;

        let mut header_bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut header_bytes)
            .context("Failed to read plate header")?;
        let header = PlateHeader::from_bytes(&header_bytes)?;

        let mut compressed = vec![0u8; header.payload_len as usize];
        file.read_exact(&mut compressed)
            .context("Failed to read plate payload")?;

        let mut hasher = Hasher::new();
        hasher.update(&compressed);
        let computed_crc = hasher.finalize();
        if computed_crc != header.crc32 {
            anyhow::bail!(
                "CRC32 mismatch: expected {:08X}, got {:08X}",
                header.crc32,
                computed_crc
            );
        }

        let decompressed =
            zstd::decode_all(&compressed[..]).context("Failed to decompress plate")?;
        bincode::deserialize(&decompressed).context("Failed to deserialize plate")
    }

    fn write_plate(&self, path: &Path, payload: &PlatePayload) -> Result<()> {
        let serialized = bincode::serialize(payload).context("Failed to serialize plate")?;
        let compressed = zstd::encode_all(&serialized[..], self.compression_level)
            .context("Failed to compress plate")?;

        let mut hasher = Hasher::new();
        hasher.update(&compressed);
        let header = PlateHeader::new(hasher.finalize(), compressed.len() as u32);

        // Readers never see a half-written plate: write aside, then rename.
        let tmp = path.with_extension("plate.tmp");
        {
            let mut file = File::create(&tmp).context("Failed to create plate file")?;
            file.write_all(&header.to_bytes())
                .context("Failed to write header")?;
            file.write_all(&compressed)
                .context("Failed to write payload")?;
            file.sync_all().context("Failed to sync plate file")?;
        }
        fs::rename(&tmp, path).context("Failed to move plate file into place")?;
        Ok(())
    }
}

impl PlateStore for RegionPlateStore {
    fn load(&self, coord: PlateCoord) -> Result<Option<PlatePayload>, MantleError> {
        let path = self.plate_path(coord);
        if !path.exists() {
            return Ok(None);
        }
        let payload = self
            .read_plate(&path)
            .with_context(|| format!("reading {}", path.display()))
            .map_err(|err| MantleError::store(coord, err))?;
        debug!(plate = %coord, sections = payload.sections.len(), "Loaded plate");
        Ok(Some(payload))
    }

    fn persist(&self, coord: PlateCoord, payload: &PlatePayload) -> Result<(), MantleError> {
        let path = self.plate_path(coord);
        self.write_plate(&path, payload)
            .with_context(|| format!("writing {}", path.display()))
            .map_err(|err| MantleError::store(coord, err))?;
        debug!(plate = %coord, sections = payload.sections.len(), "Persisted plate");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SectionRecord;
    use strata_core::CHUNK_COLUMNS;

    fn payload(value: f64) -> PlatePayload {
        PlatePayload {
            sections: vec![SectionRecord {
                index: 7,
                heights: vec![value; CHUNK_COLUMNS],
            }],
        }
    }

    #[test]
    fn plate_header_roundtrip() {
        let header = PlateHeader::new(0xDEADBEEF, 1234);
        let bytes = header.to_bytes();
        let decoded = PlateHeader::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.magic, PLATE_MAGIC);
        assert_eq!(decoded.version, PLATE_VERSION);
        assert_eq!(decoded.crc32, 0xDEADBEEF);
        assert_eq!(decoded.payload_len, 1234);
    }

    #[test]
    fn header_rejects_foreign_magic() {
        let mut bytes = PlateHeader::new(0, 0).to_bytes();
        bytes[0] ^= 0xFF;
        assert!(PlateHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn missing_plate_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionPlateStore::new(dir.path()).unwrap();
        assert!(store.load(PlateCoord::new(3, 3)).unwrap().is_none());
    }

    #[test]
    fn save_and_load_plate() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionPlateStore::new(dir.path()).unwrap();
        let coord = PlateCoord::new(-2, 5);

        store.persist(coord, &payload(70.25)).unwrap();
        let loaded = store.load(coord).unwrap().expect("plate on disk");
        assert_eq!(loaded, payload(70.25));
        assert!(dir.path().join("p.-2.5.plate").exists());
    }

    #[test]
    fn persist_replaces_previous_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionPlateStore::new(dir.path()).unwrap().with_compression_level(1);
        let coord = PlateCoord::new(0, 0);

        store.persist(coord, &payload(1.0)).unwrap();
        store.persist(coord, &payload(2.0)).unwrap();
        assert_eq!(store.load(coord).unwrap(), Some(payload(2.0)));
    }

    #[test]
    fn corrupted_payload_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionPlateStore::new(dir.path()).unwrap();
        let coord = PlateCoord::new(1, 1);
        store.persist(coord, &payload(5.0)).unwrap();

        let path = dir.path().join("p.1.1.plate");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;
        fs::write(&path, bytes).unwrap();

        let err = store.load(coord).unwrap_err();
        assert!(matches!(err, MantleError::Store { .. }));
    }
}

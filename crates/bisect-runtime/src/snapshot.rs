//! Coverage snapshot format.
//!
//! A dump is the magic string followed by a bincode-encoded [`Snapshot`].
//! Files appear in registration order; counts are indexed by point.

use crate::result::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Leading bytes of every dump
pub const MAGIC: &[u8] = b"BISECT-COVERAGE-4";

/// Counters of one instrumented compilation unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    /// Identifier the unit registered under
    pub file_id: String,
    /// One count per instrumented point
    pub counts: Vec<u64>,
    /// Opaque point metadata supplied at registration
    pub metadata: Vec<u8>,
}

/// All counters at dump time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Per-file coverage, in registration order
    pub files: Vec<FileCoverage>,
}

impl Snapshot {
    /// Coverage for `file_id`, if registered
    #[must_use]
    pub fn file(&self, file_id: &str) -> Option<&FileCoverage> {
        self.files.iter().find(|f| f.file_id == file_id)
    }

    /// Write magic plus encoded body
    pub fn write_to<W: Write>(&self, writer: &mut W) -> RuntimeResult<()> {
        writer.write_all(MAGIC)?;
        bincode::serialize_into(&mut *writer, self)?;
        Ok(())
    }

    /// Encode into memory
    pub fn to_bytes(&self) -> RuntimeResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Read a dump, checking the magic first
    pub fn read_from<R: Read>(reader: &mut R) -> RuntimeResult<Self> {
        let mut magic = [0_u8; MAGIC.len()];
        reader
            .read_exact(&mut magic)
            .map_err(|_| RuntimeError::BadMagic)?;
        if magic != MAGIC {
            return Err(RuntimeError::BadMagic);
        }
        Ok(bincode::deserialize_from(reader)?)
    }

    /// Decode from memory
    pub fn from_bytes(mut bytes: &[u8]) -> RuntimeResult<Self> {
        Self::read_from(&mut bytes)
    }
}

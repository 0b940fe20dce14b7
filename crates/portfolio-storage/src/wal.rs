//! Write-ahead log driver backing `building.db`
//!
//! The file is a sequence of frames:
//!
//! ```text
//! ┌────────────┬──────────────────────┬──────────────────────┐
//! │ len: u32LE │ sha256(payload)[..8] │ bincode(LogEntry)    │
//! └────────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! The first frame is a `Header` naming the owning building. Each
//! `save_floor_plan` appends `BeginTx / PutFloorPlan / CommitTx` in a single
//! write followed by `sync_data`. Replay applies committed transactions only,
//! so a crash mid-append leaves the previous state visible. A frame cut short
//! at the end of the file is a torn write and gets truncated away; a complete
//! frame that fails its digest is corruption and refuses to open.

use crate::context::Context;
use crate::driver::StorageDriver;
use crate::error::StoreError;
use crate::query::{Rows, StoreQuery};
use chrono::Utc;
use portfolio_model::FloorPlan;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const LOG_FORMAT_VERSION: u32 = 1;

/// Frames in the log before a save triggers compaction.
pub const DEFAULT_COMPACT_AFTER_FRAMES: usize = 512;

const FRAME_HEADER_LEN: usize = 12;
const DIGEST_LEN: usize = 8;
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

// ============================================================================
// Log Entries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntry {
    Header {
        format_version: u32,
        building_id: String,
        created_at: i64,
    },
    BeginTx {
        tx_id: u64,
        timestamp: i64,
    },
    PutFloorPlan {
        tx_id: u64,
        plan: FloorPlan,
    },
    CommitTx {
        tx_id: u64,
    },
}

pub(crate) fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>, StoreError> {
    let payload = bincode::serialize(entry).map_err(|e| StoreError::Encode(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(StoreError::Encode(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    let digest = Sha256::digest(&payload);

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&digest[..DIGEST_LEN]);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn encode_frames(entries: &[LogEntry]) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend(encode_frame(entry)?);
    }
    Ok(buf)
}

// ============================================================================
// Replay
// ============================================================================

#[derive(Debug, Default)]
struct Replay {
    plans: BTreeMap<String, FloorPlan>,
    next_tx: u64,
    frames: usize,
    valid_len: u64,
    header_seen: bool,
    torn: bool,
}

fn replay(path: &Path, bytes: &[u8], building_id: &str) -> Result<Replay, StoreError> {
    let corrupt = |offset: usize, reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        offset: offset as u64,
        reason,
    };

    let mut out = Replay {
        next_tx: 1,
        ..Default::default()
    };
    let mut pending: HashMap<u64, Vec<FloorPlan>> = HashMap::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        if bytes.len() - offset < FRAME_HEADER_LEN {
            out.torn = true;
            break;
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[offset..offset + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(corrupt(offset, format!("frame length {len} exceeds limit")));
        }

        let start = offset + FRAME_HEADER_LEN;
        let end = start + len;
        if end > bytes.len() {
            out.torn = true;
            break;
        }

        let payload = &bytes[start..end];
        let digest = Sha256::digest(payload);
        if digest[..DIGEST_LEN] != bytes[offset + 4..start] {
            return Err(corrupt(offset, "digest mismatch".to_string()));
        }
        let entry: LogEntry =
            bincode::deserialize(payload).map_err(|e| corrupt(offset, e.to_string()))?;

        match entry {
            LogEntry::Header {
                format_version,
                building_id: owner,
                ..
            } => {
                if out.header_seen {
                    return Err(corrupt(offset, "duplicate header".to_string()));
                }
                if owner != building_id {
                    return Err(StoreError::Unavailable {
                        path: path.to_path_buf(),
                        reason: format!("log belongs to building {owner}, not {building_id}"),
                    });
                }
                if format_version > LOG_FORMAT_VERSION {
                    return Err(StoreError::Unavailable {
                        path: path.to_path_buf(),
                        reason: format!("unsupported log format version {format_version}"),
                    });
                }
                out.header_seen = true;
            }
            _ if !out.header_seen => {
                return Err(corrupt(offset, "log does not start with a header".to_string()));
            }
            LogEntry::BeginTx { tx_id, .. } => {
                pending.insert(tx_id, Vec::new());
                out.next_tx = out.next_tx.max(tx_id + 1);
            }
            LogEntry::PutFloorPlan { tx_id, plan } => {
                pending.entry(tx_id).or_default().push(plan);
            }
            LogEntry::CommitTx { tx_id } => {
                if let Some(plans) = pending.remove(&tx_id) {
                    for plan in plans {
                        out.plans.insert(plan.name.clone(), plan);
                    }
                }
            }
        }

        out.frames += 1;
        offset = end;
    }

    if !pending.is_empty() {
        tracing::debug!(
            path = %path.display(),
            uncommitted = pending.len(),
            "ignoring uncommitted transactions in building log"
        );
    }

    out.valid_len = offset as u64;
    Ok(out)
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug)]
struct Connection {
    path: PathBuf,
    file: File,
    plans: BTreeMap<String, FloorPlan>,
    next_tx: u64,
    frames: usize,
    len: u64,
}

impl Connection {
    /// Append `entries` as one write. On failure the file is cut back to its
    /// previous length so no partial frames stay behind.
    fn append(&mut self, entries: &[LogEntry], op: &'static str) -> Result<(), StoreError> {
        let buf = encode_frames(entries)?;

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = written {
            if let Err(truncate_err) = self.file.set_len(self.len) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "failed to roll back partial log append"
                );
            }
            return Err(StoreError::io(op, err));
        }

        self.len += buf.len() as u64;
        self.frames += entries.len();
        Ok(())
    }

    /// Rewrite the log as header + one committed snapshot transaction, via a
    /// temp file renamed over the original.
    ///
    /// The append handle is opened on the temp file before the rename, so a
    /// failure at any step leaves the old log and the old handle in place.
    fn compact(&mut self, building_id: &str) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let now = Utc::now().timestamp();
        let tx_id = self.next_tx;

        let mut entries = Vec::with_capacity(self.plans.len() + 3);
        entries.push(LogEntry::Header {
            format_version: LOG_FORMAT_VERSION,
            building_id: building_id.to_string(),
            created_at: now,
        });
        entries.push(LogEntry::BeginTx {
            tx_id,
            timestamp: now,
        });
        entries.extend(self.plans.values().map(|plan| LogEntry::PutFloorPlan {
            tx_id,
            plan: plan.clone(),
        }));
        entries.push(LogEntry::CommitTx { tx_id });
        let buf = encode_frames(&entries)?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&parent).map_err(|e| StoreError::io("compact", e))?;
        tmp.write_all(&buf)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io("compact", e))?;
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(tmp.path())
            .map_err(|e| StoreError::io("compact", e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io("compact", e.error))?;

        self.file = file;
        self.len = buf.len() as u64;
        self.frames = entries.len();
        self.next_tx = tx_id + 1;
        Ok(())
    }
}

// ============================================================================
// Log Driver
// ============================================================================

/// File-backed [`StorageDriver`] using the frame log described above.
#[derive(Debug)]
pub struct LogDriver {
    building_id: String,
    compact_after: usize,
    conn: Option<Connection>,
}

impl LogDriver {
    pub fn new(building_id: impl Into<String>) -> Self {
        Self {
            building_id: building_id.into(),
            compact_after: DEFAULT_COMPACT_AFTER_FRAMES,
            conn: None,
        }
    }

    pub fn with_compact_after(mut self, frames: usize) -> Self {
        self.compact_after = frames.max(4);
        self
    }

    pub fn building_id(&self) -> &str {
        &self.building_id
    }

    /// Frames currently in the log (0 when closed).
    pub fn frame_count(&self) -> usize {
        self.conn.as_ref().map_or(0, |c| c.frames)
    }

    fn connection(&self) -> Result<&Connection, StoreError> {
        self.conn.as_ref().ok_or_else(|| StoreError::Closed {
            building_id: self.building_id.clone(),
        })
    }
}

impl StorageDriver for LogDriver {
    fn connect(&mut self, ctx: &Context, path: &Path) -> Result<(), StoreError> {
        if let Some(conn) = &self.conn {
            if conn.path == path {
                return Ok(());
            }
            return Err(StoreError::AlreadyConnected {
                current: conn.path.clone(),
                requested: path.to_path_buf(),
            });
        }
        ctx.check("connect")?;

        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| unavailable(e.to_string()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| unavailable(e.to_string()))?;

        let replayed = replay(path, &bytes, &self.building_id)?;
        if replayed.torn {
            tracing::warn!(
                path = %path.display(),
                kept_bytes = replayed.valid_len,
                dropped_bytes = bytes.len() as u64 - replayed.valid_len,
                "truncating torn tail of building log"
            );
            file.set_len(replayed.valid_len)
                .map_err(|e| unavailable(e.to_string()))?;
        }

        let mut conn = Connection {
            path: path.to_path_buf(),
            file,
            plans: replayed.plans,
            next_tx: replayed.next_tx,
            frames: replayed.frames,
            len: replayed.valid_len,
        };
        if !replayed.header_seen {
            conn.append(
                &[LogEntry::Header {
                    format_version: LOG_FORMAT_VERSION,
                    building_id: self.building_id.clone(),
                    created_at: Utc::now().timestamp(),
                }],
                "connect",
            )
            .map_err(|e| unavailable(e.to_string()))?;
        }

        tracing::debug!(
            building_id = %self.building_id,
            path = %path.display(),
            plans = conn.plans.len(),
            frames = conn.frames,
            "building log opened"
        );
        self.conn = Some(conn);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn query(&self, ctx: &Context, query: &StoreQuery) -> Result<Rows, StoreError> {
        let conn = self.connection()?;
        ctx.check("query")?;
        Ok(query.evaluate(&conn.plans))
    }

    fn save_floor_plan(&mut self, ctx: &Context, plan: &FloorPlan) -> Result<(), StoreError> {
        let building_id = &self.building_id;
        let conn = self.conn.as_mut().ok_or_else(|| StoreError::Closed {
            building_id: building_id.clone(),
        })?;
        ctx.check("save_floor_plan")?;
        plan.validate()?;

        let tx_id = conn.next_tx;
        conn.append(
            &[
                LogEntry::BeginTx {
                    tx_id,
                    timestamp: Utc::now().timestamp(),
                },
                LogEntry::PutFloorPlan {
                    tx_id,
                    plan: plan.clone(),
                },
                LogEntry::CommitTx { tx_id },
            ],
            "save_floor_plan",
        )?;
        conn.next_tx += 1;
        conn.plans.insert(plan.name.clone(), plan.clone());

        if conn.frames > self.compact_after {
            if let Err(err) = conn.compact(building_id) {
                tracing::warn!(
                    building_id = %building_id,
                    error = %err,
                    "log compaction failed; keeping uncompacted log"
                );
            }
        }
        Ok(())
    }

    fn floor_plans(&self, ctx: &Context) -> Result<Vec<FloorPlan>, StoreError> {
        let conn = self.connection()?;
        ctx.check("floor_plans")?;
        Ok(conn.plans.values().cloned().collect())
    }

    fn compact(&mut self, ctx: &Context) -> Result<(), StoreError> {
        let building_id = &self.building_id;
        let conn = self.conn.as_mut().ok_or_else(|| StoreError::Closed {
            building_id: building_id.clone(),
        })?;
        ctx.check("compact")?;
        conn.compact(building_id)
    }

    fn close(&mut self) -> Result<(), StoreError> {
        match self.conn.take() {
            Some(conn) => conn
                .file
                .sync_all()
                .map_err(|e| StoreError::io("close", e)),
            None => Ok(()),
        }
    }
}

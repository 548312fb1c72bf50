// src/audit_log.rs

//! Advisory on-disk projection of the tracked flows.
//!
//! The file is line oriented, one line per flow:
//!
//! ```text
//! 10.0.0.1,10.0.0.2,00000001700000000000
//! ```
//!
//! `last_seen` is written zero-padded to a fixed width so an update can
//! overwrite just that field. An in-memory index maps each key to its line,
//! so neither `update` nor `remove` has to scan the file. Removed lines are
//! tombstoned by overwriting their first byte with `#` and are dropped for
//! good by [`AuditLog::compact`].
//!
//! The log may lag the tracking store and is not transactional with it.
//! Opening a damaged file recovers every line that still parses.

// dependencies
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::errors::AuditError;
use crate::flow::FlowKey;

const TIMESTAMP_WIDTH: usize = 20;
const TOMBSTONE: u8 = b'#';

/// One logical log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    pub key: FlowKey,
    pub last_seen: u64,
}

impl AuditEntry {
    pub fn new(key: FlowKey, last_seen: u64) -> Self {
        Self { key, last_seen }
    }

    fn to_line(self) -> String {
        format!(
            "{},{},{:0width$}\n",
            self.key.source,
            self.key.destination,
            self.last_seen,
            width = TIMESTAMP_WIDTH
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    line_offset: u64,
    timestamp_offset: u64,
    timestamp_width: usize,
    last_seen: u64,
}

/// Result of reading the file from the top.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// One entry per key, last occurrence in the file wins, in file order.
    pub entries: Vec<AuditEntry>,
    /// Lines skipped because they did not parse.
    pub errors: Vec<AuditError>,
}

#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: File,
    index: HashMap<FlowKey, Slot>,
    end: u64,
    dead_lines: usize,
    parse_errors: usize,
}

impl AuditLog {
    /// Open (or create) the log at `path` and index it.
    ///
    /// A trailing line without a newline is a torn write and is truncated
    /// away. Lines that fail to parse are skipped and counted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut log = Self {
            path,
            file,
            index: HashMap::new(),
            end: 0,
            dead_lines: 0,
            parse_errors: 0,
        };
        log.rebuild_index()?;
        Ok(log)
    }

    /// Close and re-read the file, discarding the in-memory index.
    pub fn reopen(&mut self) -> Result<(), AuditError> {
        *self = Self::open(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Tombstoned or superseded lines still taking space in the file.
    pub fn dead_lines(&self) -> usize {
        self.dead_lines
    }

    /// Malformed lines skipped by the last open.
    pub fn parse_errors(&self) -> usize {
        self.parse_errors
    }

    /// Indexed `last_seen` for `key`.
    pub fn last_seen(&self, key: &FlowKey) -> Option<u64> {
        self.index.get(key).map(|slot| slot.last_seen)
    }

    /// Append a new entry. If the key already has a line, that line is
    /// superseded by the new one.
    pub fn append(&mut self, entry: AuditEntry) -> Result<(), AuditError> {
        if let Some(old) = self.index.get(&entry.key).copied() {
            self.write_at(old.line_offset, &[TOMBSTONE])?;
            self.dead_lines += 1;
        }
        let line = entry.to_line();
        let line_offset = self.end;
        self.write_at(line_offset, line.as_bytes())?;
        self.end += line.len() as u64;

        let timestamp_offset = line_offset + (line.len() - 1 - TIMESTAMP_WIDTH) as u64;
        self.index.insert(
            entry.key,
            Slot {
                line_offset,
                timestamp_offset,
                timestamp_width: TIMESTAMP_WIDTH,
                last_seen: entry.last_seen,
            },
        );
        Ok(())
    }

    /// Rewrite the `last_seen` field of the existing entry for `key`.
    pub fn update(&mut self, key: &FlowKey, last_seen: u64) -> Result<(), AuditError> {
        let slot = self
            .index
            .get(key)
            .copied()
            .ok_or(AuditError::EntryNotFound(*key))?;

        if slot.timestamp_width != TIMESTAMP_WIDTH {
            // line was not written by us; it cannot be patched in place
            return self.append(AuditEntry::new(*key, last_seen));
        }

        let field = format!("{:0width$}", last_seen, width = TIMESTAMP_WIDTH);
        self.write_at(slot.timestamp_offset, field.as_bytes())?;
        if let Some(slot) = self.index.get_mut(key) {
            slot.last_seen = last_seen;
        }
        Ok(())
    }

    /// Mark the entry for `key` stale.
    pub fn remove(&mut self, key: &FlowKey) -> Result<(), AuditError> {
        let slot = self
            .index
            .remove(key)
            .ok_or(AuditError::EntryNotFound(*key))?;
        self.write_at(slot.line_offset, &[TOMBSTONE])?;
        self.dead_lines += 1;
        Ok(())
    }

    /// Tombstone every entry whose `last_seen` is at or before `cutoff`.
    /// Returns how many were removed.
    pub fn expire(&mut self, cutoff: u64) -> Result<usize, AuditError> {
        let stale: Vec<FlowKey> = self
            .index
            .iter()
            .filter(|(_, slot)| slot.last_seen <= cutoff)
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            self.remove(key)?;
        }
        Ok(stale.len())
    }

    /// Whether dead lines outnumber live ones.
    pub fn needs_compaction(&self) -> bool {
        self.dead_lines > 0 && self.dead_lines >= self.index.len()
    }

    /// Rewrite the file with live entries only.
    pub fn compact(&mut self) -> Result<(), AuditError> {
        let mut live: Vec<(u64, AuditEntry)> = self
            .index
            .iter()
            .map(|(key, slot)| (slot.line_offset, AuditEntry::new(*key, slot.last_seen)))
            .collect();
        live.sort_by_key(|(offset, _)| *offset);

        let tmp_path = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            for (_, entry) in &live {
                out.write_all(entry.to_line().as_bytes())?;
            }
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            live = live.len(),
            reclaimed = self.dead_lines,
            "audit log compacted"
        );
        self.reopen()
    }

    /// Flush written data to disk.
    pub fn sync(&self) -> Result<(), AuditError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Read the whole file again and return its entries.
    ///
    /// Corrupt lines are reported in [`ScanOutcome::errors`] and skipped;
    /// everything that parses is returned.
    pub fn scan(&self) -> Result<ScanOutcome, AuditError> {
        let file = File::open(&self.path)?;
        Ok(scan_lines(BufReader::new(file))?.outcome())
    }

    fn rebuild_index(&mut self) -> Result<(), AuditError> {
        self.file.seek(SeekFrom::Start(0))?;
        let parsed = scan_lines(BufReader::new(&self.file))?;

        if parsed.valid_len < parsed.total_len {
            tracing::warn!(
                path = %self.path.display(),
                bytes = parsed.total_len - parsed.valid_len,
                "truncating torn tail of audit log"
            );
            self.file.set_len(parsed.valid_len)?;
        }
        for err in &parsed.errors {
            tracing::warn!(path = %self.path.display(), error = %err, "skipping audit line");
        }

        self.end = parsed.valid_len;
        self.parse_errors = parsed.errors.len();
        self.dead_lines = parsed.tombstones + parsed.errors.len();
        self.index.clear();
        let mut superseded = Vec::new();
        for line in parsed.lines {
            if let Some(old) = self.index.insert(line.entry.key, line.slot) {
                superseded.push(old.line_offset);
            }
        }
        // only the newest line per key may survive a later remove
        for offset in &superseded {
            self.write_at(*offset, &[TOMBSTONE])?;
        }
        self.dead_lines += superseded.len();
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), AuditError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}

struct ParsedLine {
    entry: AuditEntry,
    slot: Slot,
}

#[derive(Default)]
struct ParsedFile {
    lines: Vec<ParsedLine>,
    errors: Vec<AuditError>,
    tombstones: usize,
    // bytes up to and including the last newline
    valid_len: u64,
    total_len: u64,
}

impl ParsedFile {
    fn outcome(self) -> ScanOutcome {
        let mut latest: HashMap<FlowKey, usize> = HashMap::new();
        for (i, line) in self.lines.iter().enumerate() {
            latest.insert(line.entry.key, i);
        }
        let entries = self
            .lines
            .iter()
            .enumerate()
            .filter(|(i, line)| latest.get(&line.entry.key) == Some(i))
            .map(|(_, line)| line.entry)
            .collect();
        ScanOutcome {
            entries,
            errors: self.errors,
        }
    }
}

fn scan_lines<R: BufRead>(mut reader: R) -> io::Result<ParsedFile> {
    let mut parsed = ParsedFile::default();
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;
        let line_offset = parsed.total_len;
        parsed.total_len += read as u64;

        if buf.last() != Some(&b'\n') {
            // torn final write, only possible at EOF
            break;
        }
        parsed.valid_len = parsed.total_len;

        let body = &buf[..buf.len() - 1];
        if body.is_empty() {
            continue;
        }
        if body[0] == TOMBSTONE {
            parsed.tombstones += 1;
            continue;
        }
        match parse_line(body, line_offset) {
            Ok(line) => parsed.lines.push(line),
            Err(reason) => parsed.errors.push(AuditError::Parse {
                line: line_no,
                reason,
            }),
        }
    }
    Ok(parsed)
}

fn parse_line(body: &[u8], line_offset: u64) -> Result<ParsedLine, String> {
    let text = std::str::from_utf8(body).map_err(|_| "not valid utf-8".to_string())?;
    let mut fields = text.split(',');
    let (Some(source), Some(destination), Some(timestamp), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(format!("expected 3 fields in {text:?}"));
    };

    let source: IpAddr = source
        .trim()
        .parse()
        .map_err(|_| format!("bad source address {source:?}"))?;
    let destination: IpAddr = destination
        .trim()
        .parse()
        .map_err(|_| format!("bad destination address {destination:?}"))?;
    let last_seen: u64 = timestamp
        .parse()
        .map_err(|_| format!("bad timestamp {timestamp:?}"))?;

    let timestamp_offset = line_offset + (text.len() - timestamp.len()) as u64;
    Ok(ParsedLine {
        entry: AuditEntry::new(FlowKey::new(source, destination), last_seen),
        slot: Slot {
            line_offset,
            timestamp_offset,
            timestamp_width: timestamp.len(),
            last_seen,
        },
    })
}

//! The snapshot persistence codec (C7): a text-framed, length-prefixed dump
//! of the whole keyspace, grounded in the original C implementation's
//! `persistence.c` layout, extended with a type tag and TTL field to cover
//! the list/hash kinds and expiry that the original didn't have.
//!
//! LOAD parses into a staging keyspace and only swaps it in on complete
//! success (the REDESIGN FLAG in SPEC_FULL.md §9 is taken): a malformed
//! snapshot leaves the live keyspace untouched instead of the original's
//! clear-then-parse behavior, which would have emptied the store on a
//! truncated file.

use crate::error::PersistenceError;
use crate::keyspace::Keyspace;
use crate::value::{Entry, Value};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const SIGNATURE: &str = "KVSTORE";
const VERSION: u32 = 1;

const TYPE_STRING: u32 = 0;
const TYPE_LIST: u32 = 1;
const TYPE_HASH: u32 = 2;

/// Append `.db` to `path` unless it already ends in `.db` (case-insensitive).
pub fn resolve_snapshot_path(path: &str) -> PathBuf {
    if path.to_ascii_lowercase().ends_with(".db") {
        PathBuf::from(path)
    } else {
        PathBuf::from(format!("{path}.db"))
    }
}

pub fn save(keyspace: &Keyspace, path: &Path, now: Instant) -> Result<(), PersistenceError> {
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);
    write_snapshot(&mut w, keyspace, now)?;
    w.flush()?;
    Ok(())
}

pub fn load(path: &Path, now: Instant) -> Result<Keyspace, PersistenceError> {
    let file = std::fs::File::open(path)?;
    let mut r = BufReader::new(file);
    read_snapshot(&mut r, now)
}

fn write_snapshot<W: Write>(
    w: &mut W,
    keyspace: &Keyspace,
    now: Instant,
) -> Result<(), PersistenceError> {
    writeln!(w, "{SIGNATURE}")?;
    writeln!(w, "{VERSION}")?;
    let entries: Vec<_> = keyspace.iter_live(now).collect();
    writeln!(w, "{}", entries.len())?;
    for (key, entry) in entries {
        write_bytes_field(w, key)?;
        let ttl_secs = entry.ttl_seconds(now).unwrap_or(0).max(0);
        match &entry.value {
            Value::String(s) => {
                writeln!(w, "{TYPE_STRING}")?;
                writeln!(w, "{ttl_secs}")?;
                write_bytes_field(w, s)?;
            }
            Value::List(list) => {
                writeln!(w, "{TYPE_LIST}")?;
                writeln!(w, "{ttl_secs}")?;
                writeln!(w, "{}", list.len())?;
                for item in list {
                    write_bytes_field(w, item)?;
                }
            }
            Value::Hash(fields) => {
                writeln!(w, "{TYPE_HASH}")?;
                writeln!(w, "{ttl_secs}")?;
                writeln!(w, "{}", fields.len())?;
                for (field, value) in fields {
                    write_bytes_field(w, field)?;
                    write_bytes_field(w, value)?;
                }
            }
        }
    }
    Ok(())
}

fn write_bytes_field<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), PersistenceError> {
    writeln!(w, "{}", bytes.len())?;
    w.write_all(bytes)?;
    w.write_all(b"\n")?;
    Ok(())
}

struct SnapshotReader<R: BufRead> {
    inner: R,
}

impl<R: BufRead> SnapshotReader<R> {
    fn read_line_trimmed(&mut self) -> Result<String, PersistenceError> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line)?;
        if n == 0 {
            return Err(PersistenceError::CorruptSnapshot("unexpected end of file"));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    fn read_usize(&mut self) -> Result<usize, PersistenceError> {
        self.read_line_trimmed()?
            .parse()
            .map_err(|_| PersistenceError::CorruptSnapshot("expected an unsigned integer"))
    }

    fn read_i64(&mut self) -> Result<i64, PersistenceError> {
        self.read_line_trimmed()?
            .parse()
            .map_err(|_| PersistenceError::CorruptSnapshot("expected an integer"))
    }

    /// `<len>\n<bytes><\n>` as written by `write_bytes_field`.
    fn read_bytes_field(&mut self) -> Result<Vec<u8>, PersistenceError> {
        let len = self.read_usize()?;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        let mut nl = [0u8; 1];
        self.inner.read_exact(&mut nl)?;
        if nl[0] != b'\n' {
            return Err(PersistenceError::CorruptSnapshot(
                "missing newline after byte field",
            ));
        }
        Ok(buf)
    }
}

fn read_snapshot<R: BufRead>(r: &mut R, now: Instant) -> Result<Keyspace, PersistenceError> {
    let mut reader = SnapshotReader { inner: r };
    let signature = reader.read_line_trimmed()?;
    if signature != SIGNATURE {
        return Err(PersistenceError::CorruptSnapshot("bad signature"));
    }
    let version = reader.read_usize()?;
    if version as u32 != VERSION {
        return Err(PersistenceError::CorruptSnapshot("unsupported version"));
    }
    let count = reader.read_usize()?;
    let mut staging = Keyspace::new();
    for _ in 0..count {
        let key = reader.read_bytes_field()?;
        let kind = reader.read_usize()? as u32;
        let ttl_secs = reader.read_i64()?;
        let value = match kind {
            TYPE_STRING => Value::String(reader.read_bytes_field()?),
            TYPE_LIST => {
                let len = reader.read_usize()?;
                let mut list = VecDeque::with_capacity(len);
                for _ in 0..len {
                    list.push_back(reader.read_bytes_field()?);
                }
                Value::List(list)
            }
            TYPE_HASH => {
                let len = reader.read_usize()?;
                let mut fields = Vec::with_capacity(len);
                for _ in 0..len {
                    let field = reader.read_bytes_field()?;
                    let value = reader.read_bytes_field()?;
                    fields.push((field, value));
                }
                Value::Hash(fields)
            }
            _ => return Err(PersistenceError::CorruptSnapshot("unknown value kind tag")),
        };
        let mut entry = Entry::persistent(value);
        if ttl_secs > 0 {
            entry.set_ttl(ttl_secs, now);
        }
        staging.restore_entry(key, entry);
    }
    Ok(staging)
}

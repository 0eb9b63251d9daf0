#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! ETL data collector.
//!
//! Dumps unsorted key-value data into temporary files and iterates over its
//! sorted representation later on. The headers stage uses this to buffer
//! downloaded headers keyed by block number so that they can be replayed
//! parent-first regardless of arrival order.

use hearth_db::table::{Decode, Encode};
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};
use tempfile::{NamedTempFile, TempDir};

/// An ETL (extract, transform, load) data collector.
///
/// Data is pushed to the collector, which flushes it in sorted runs to
/// temporary files once the in-memory buffer exceeds its capacity. The data
/// can then be iterated over in fully sorted order across all runs.
pub struct Collector<K, V>
where
    K: Encode,
    V: Encode,
{
    /// Directory holding the spill files for the lifetime of the collector.
    dir: TempDir,
    files: Vec<EtlFile>,
    buffer: Vec<(K::Encoded, V::Encoded)>,
    buffer_size_bytes: usize,
    buffer_capacity_bytes: usize,
    len: usize,
}

impl<K, V> std::fmt::Debug for Collector<K, V>
where
    K: Encode,
    V: Encode,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("len", &self.len)
            .field("files", &self.files.len())
            .finish()
    }
}

impl<K, V> Collector<K, V>
where
    K: Encode,
    V: Encode,
    K::Encoded: Ord,
{
    /// Creates a new collector with the given in-memory buffer capacity in
    /// bytes.
    pub fn new(buffer_capacity_bytes: usize) -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            files: Vec::new(),
            buffer: Vec::new(),
            buffer_size_bytes: 0,
            buffer_capacity_bytes,
            len: 0,
        })
    }

    /// Returns the number of elements in the collector.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the collector holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts an entry into the collector.
    pub fn insert(&mut self, key: K, value: V) -> std::io::Result<()> {
        let key = key.encode();
        let value = value.encode();
        self.buffer_size_bytes += key.as_ref().len() + value.as_ref().len();
        self.buffer.push((key, value));
        if self.buffer_size_bytes > self.buffer_capacity_bytes {
            self.flush()?;
        }
        self.len += 1;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.buffer_size_bytes = 0;
        let mut run = std::mem::take(&mut self.buffer);
        run.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        self.files.push(EtlFile::write(self.dir.path(), &run)?);
        Ok(())
    }

    /// Returns an iterator over the collector data, sorted by encoded key
    /// across all spill files.
    pub fn iter(&mut self) -> std::io::Result<EtlIter<'_>> {
        if self.buffer_size_bytes > 0 || !self.buffer.is_empty() {
            self.flush()?;
        }

        let mut heap = BinaryHeap::new();
        for (current_id, file) in self.files.iter_mut().enumerate() {
            if let Some((key, value)) = file.read_next()? {
                heap.push((Reverse((key, value)), current_id));
            }
        }

        Ok(EtlIter { heap, files: &mut self.files })
    }
}

/// An iterator over sorted data in a collection of ETL files.
///
/// The items are pre-encoded `(key, value)` byte pairs; decode them with the
/// matching [`Decode`] implementations.
#[derive(Debug)]
pub struct EtlIter<'a> {
    #[allow(clippy::type_complexity)]
    heap: BinaryHeap<(Reverse<(Vec<u8>, Vec<u8>)>, usize)>,
    files: &'a mut Vec<EtlFile>,
}

impl<'a> Iterator for EtlIter<'a> {
    type Item = std::io::Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (Reverse(entry), id) = self.heap.pop()?;

        // refill the heap from the file the entry came from
        match self.files[id].read_next() {
            Ok(Some((key, value))) => {
                self.heap.push((Reverse((key, value)), id));
                Some(Ok(entry))
            }
            Ok(None) => Some(Ok(entry)),
            Err(err) => Some(Err(err)),
        }
    }
}

/// Decodes an entry yielded by [`EtlIter`].
pub fn decode_entry<K: Decode, V: Decode>(
    entry: &(Vec<u8>, Vec<u8>),
) -> Result<(K, V), hearth_db::DatabaseError> {
    Ok((K::decode(&entry.0)?, V::decode(&entry.1)?))
}

/// One sorted run spilled to disk.
///
/// Keys and values are stored as a flat sequence of length-framed chunks,
/// `key, value, key, value, ...`; the entry count is kept in memory, so the
/// file needs no terminator.
#[derive(Debug)]
struct EtlFile {
    reader: BufReader<NamedTempFile>,
    remaining: usize,
}

impl EtlFile {
    fn write<K, V>(dir: &Path, run: &[(K, V)]) -> std::io::Result<Self>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut writer = BufWriter::new(NamedTempFile::new_in(dir)?);
        for (key, value) in run {
            write_chunk(&mut writer, key.as_ref())?;
            write_chunk(&mut writer, value.as_ref())?;
        }

        let mut reader = BufReader::new(writer.into_inner().map_err(|err| err.into_error())?);
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, remaining: run.len() })
    }

    fn read_next(&mut self) -> std::io::Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.remaining == 0 {
            return Ok(None)
        }
        self.remaining -= 1;

        let key = read_chunk(&mut self.reader)?;
        let value = read_chunk(&mut self.reader)?;
        Ok(Some((key, value)))
    }
}

fn write_chunk(writer: &mut impl Write, chunk: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(chunk.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "entry too large for a spill file")
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(chunk)
}

fn read_chunk(reader: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let mut chunk = vec![0; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut chunk)?;
    Ok(chunk)
}

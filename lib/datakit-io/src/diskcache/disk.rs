use std::{
    collections::VecDeque,
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;
use bytesize::ByteSize;
use metrics::counter;
use snafu::ResultExt as _;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _},
};
use tracing::{debug, info, warn};

use super::{Callback, FailCache, FailCacheError, GetCallback, Io};

const ACTIVE_SEGMENT_NAME: &str = "data";
const POSITION_FILE_NAME: &str = ".pos";
const RECORD_HEADER_LEN: u64 = 4;

const DEFAULT_BATCH_SIZE: u64 = 20 * 1024 * 1024;
const DEFAULT_CAPACITY: u64 = 1024 * 1024 * 1024;

/// Builder for [`DiskCache`].
#[derive(Clone, Debug)]
pub struct DiskCacheBuilder {
    path: PathBuf,
    batch_size: u64,
    capacity: u64,
}

impl DiskCacheBuilder {
    /// Sets the size at which the active segment is sealed.
    ///
    /// Defaults to 20 MiB.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the maximum total size of the cache.
    ///
    /// Defaults to 1 GiB.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Opens the cache, creating its directory if needed.
    ///
    /// Data left in the active segment by a previous run is sealed so that it can be read back.
    ///
    /// # Errors
    ///
    /// If the directory cannot be created or scanned, or the segment files cannot be opened, an error is returned.
    pub async fn open(self) -> Result<DiskCache, FailCacheError> {
        let Self {
            path,
            batch_size,
            capacity,
        } = self;

        tokio::fs::create_dir_all(&path).await.context(Io { path: path.clone() })?;

        let mut sealed = scan_sealed_segments(&path).await?;
        let mut next_seq = sealed.back().map(|s| s.seq + 1).unwrap_or(1);

        let active_path = path.join(ACTIVE_SEGMENT_NAME);
        let active_size = match tokio::fs::metadata(&active_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e).context(Io { path: active_path }),
        };
        if active_size > 0 {
            let sealed_path = segment_path(&path, next_seq);
            tokio::fs::rename(&active_path, &sealed_path)
                .await
                .context(Io { path: active_path.clone() })?;
            debug!(path = %sealed_path.display(), size = active_size, "Sealed leftover active segment.");
            sealed.push_back(Segment {
                seq: next_seq,
                size: active_size,
            });
            next_seq += 1;
        }

        let position = read_position(&path).await;
        let reader = match sealed.front() {
            Some(front) if front.seq == position.seq => position,
            Some(front) => ReadPosition {
                seq: front.seq,
                offset: 0,
            },
            None => ReadPosition::default(),
        };

        let file = open_active(&active_path).await?;

        info!(
            path = %path.display(),
            segments = sealed.len(),
            batch_size = %ByteSize(batch_size),
            capacity = %ByteSize(capacity),
            "Opened disk cache."
        );

        Ok(DiskCache {
            path_label: path.display().to_string(),
            path,
            batch_size,
            capacity,
            writer: tokio::sync::Mutex::new(ActiveSegment {
                file,
                size: 0,
                torn: false,
            }),
            segments: Mutex::new(Segments { sealed, next_seq }),
            reader: tokio::sync::Mutex::new(reader),
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    seq: u64,
    size: u64,
}

struct Segments {
    sealed: VecDeque<Segment>,
    next_seq: u64,
}

impl Segments {
    fn sealed_size(&self) -> u64 {
        self.sealed.iter().map(|s| s.size).sum()
    }
}

struct ActiveSegment {
    file: File,
    size: u64,
    torn: bool,
}

impl ActiveSegment {
    /// Appends one length-prefixed record.
    ///
    /// On error, the segment is truncated back to its last complete record.
    async fn append(&mut self, data: &[u8]) -> io::Result<()> {
        let header = (data.len() as u32).to_le_bytes();
        let result = async {
            self.file.write_all(&header).await?;
            self.file.write_all(data).await?;
            self.file.flush().await
        }
        .await;
        self.commit(result, RECORD_HEADER_LEN + data.len() as u64).await
    }

    async fn commit(&mut self, result: io::Result<()>, record_len: u64) -> io::Result<()> {
        match result {
            Ok(()) => {
                self.size += record_len;
                Ok(())
            }
            Err(e) => {
                // A partial record would misalign every record appended after it.
                if let Err(error) = self.file.set_len(self.size).await {
                    warn!(%error, "Failed to truncate partial disk cache record.");
                    self.torn = true;
                }
                Err(e)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ReadPosition {
    seq: u64,
    offset: u64,
}

impl ReadPosition {
    fn encode(&self) -> [u8; 16] {
        let mut buf = [0; 16];
        buf[..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let seq = u64::from_le_bytes(buf.get(..8)?.try_into().ok()?);
        let offset = u64::from_le_bytes(buf.get(8..16)?.try_into().ok()?);
        Some(Self { seq, offset })
    }
}

/// A disk-backed [`FailCache`].
///
/// Entries are appended to an active segment file as length-prefixed records. Once the active segment reaches the
/// batch size, or when [`rotate`][FailCache::rotate] is called, it is sealed into a numbered read segment. Reads consume
/// sealed segments oldest first, and the read position is persisted so that consumed entries are not replayed after a
/// restart. Fully consumed segments are deleted.
///
/// When the cache would grow past its capacity, the oldest sealed segments are dropped.
///
/// Writers and the reader use separate locks, so entries can be appended while a read callback is in flight.
pub struct DiskCache {
    path: PathBuf,
    path_label: String,
    batch_size: u64,
    capacity: u64,
    writer: tokio::sync::Mutex<ActiveSegment>,
    segments: Mutex<Segments>,
    reader: tokio::sync::Mutex<ReadPosition>,
}

impl DiskCache {
    /// Creates a builder for a cache stored in the directory at `path`.
    pub fn builder(path: impl Into<PathBuf>) -> DiskCacheBuilder {
        DiskCacheBuilder {
            path: path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Returns the cache directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the total size of all segments, in bytes.
    pub async fn size(&self) -> u64 {
        let active = self.writer.lock().await.size;
        active + self.lock_segments().sealed_size()
    }

    /// Returns the number of sealed segments waiting to be read.
    pub fn sealed_segments(&self) -> usize {
        self.lock_segments().sealed.len()
    }

    fn lock_segments(&self) -> std::sync::MutexGuard<'_, Segments> {
        self.segments.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn rotate_locked(&self, active: &mut ActiveSegment) -> Result<(), FailCacheError> {
        if active.size == 0 {
            return Ok(());
        }

        let active_path = self.path.join(ACTIVE_SEGMENT_NAME);
        active.file.flush().await.context(Io { path: active_path.clone() })?;

        let seq = self.lock_segments().next_seq;
        let sealed_path = segment_path(&self.path, seq);
        tokio::fs::rename(&active_path, &sealed_path)
            .await
            .context(Io { path: active_path.clone() })?;

        {
            let mut segments = self.lock_segments();
            segments.sealed.push_back(Segment { seq, size: active.size });
            segments.next_seq = seq + 1;
        }

        active.file = open_active(&active_path).await?;
        active.size = 0;

        counter!("diskcache_rotate_total", "path" => self.path_label.clone()).increment(1);
        debug!(path = %sealed_path.display(), "Rotated disk cache segment.");

        Ok(())
    }

    /// Moves past an active segment left with a partial record at its end.
    ///
    /// Complete records are sealed, since sealed segments are read up to their recorded size. An active segment
    /// without any complete record is recreated.
    async fn seal_torn(&self, active: &mut ActiveSegment) -> Result<(), FailCacheError> {
        if active.size > 0 {
            self.rotate_locked(active).await?;
        } else {
            let path = self.path.join(ACTIVE_SEGMENT_NAME);
            remove_segment_file(&path).await?;
            active.file = open_active(&path).await?;
        }
        active.torn = false;
        Ok(())
    }

    /// Drops the oldest sealed segments until `incoming` more bytes fit within the capacity.
    async fn make_room(&self, active_size: u64, incoming: u64) -> Result<(), FailCacheError> {
        let dropped = {
            let mut segments = self.lock_segments();
            let mut total = active_size + segments.sealed_size();
            let mut dropped = Vec::new();
            while total + incoming > self.capacity {
                match segments.sealed.pop_front() {
                    Some(segment) => {
                        total -= segment.size;
                        dropped.push(segment);
                    }
                    None => break,
                }
            }

            if total + incoming > self.capacity {
                // Nothing sealed is left to drop; put the candidates back rather than losing them for nothing.
                for segment in dropped.into_iter().rev() {
                    segments.sealed.push_front(segment);
                }
                return Err(FailCacheError::Full {
                    capacity: self.capacity,
                });
            }
            dropped
        };

        for segment in dropped {
            let path = segment_path(&self.path, segment.seq);
            warn!(path = %path.display(), size = segment.size, "Disk cache full. Dropping oldest segment.");
            remove_segment_file(&path).await?;
            counter!("diskcache_dropped_total", "path" => self.path_label.clone()).increment(1);
        }

        Ok(())
    }

    /// Removes a fully consumed segment, if it is still the oldest one.
    async fn finish_segment(&self, seq: u64) -> Result<(), FailCacheError> {
        {
            let mut segments = self.lock_segments();
            if segments.sealed.front().map(|s| s.seq) == Some(seq) {
                segments.sealed.pop_front();
            }
        }
        remove_segment_file(&segment_path(&self.path, seq)).await
    }

    async fn persist_position(&self, position: &ReadPosition) -> Result<(), FailCacheError> {
        let path = self.path.join(POSITION_FILE_NAME);
        tokio::fs::write(&path, position.encode()).await.context(Io { path })
    }
}

#[async_trait]
impl FailCache for DiskCache {
    async fn put(&self, data: Bytes) -> Result<(), FailCacheError> {
        let record_len = RECORD_HEADER_LEN + data.len() as u64;
        if record_len > self.capacity || data.len() > u32::MAX as usize {
            return Err(FailCacheError::TooLarge {
                len: data.len() as u64,
                capacity: self.capacity,
            });
        }

        let mut active = self.writer.lock().await;
        self.make_room(active.size, record_len).await?;

        if let Err(e) = active.append(&data).await {
            if active.torn {
                self.seal_torn(&mut active).await?;
            }
            return Err(e).context(Io {
                path: self.path.join(ACTIVE_SEGMENT_NAME),
            });
        }

        counter!("diskcache_put_total", "path" => self.path_label.clone()).increment(1);
        counter!("diskcache_put_bytes_total", "path" => self.path_label.clone()).increment(data.len() as u64);

        if active.size >= self.batch_size {
            self.rotate_locked(&mut active).await?;
        }

        Ok(())
    }

    async fn get(&self, callback: GetCallback<'_>) -> Result<(), FailCacheError> {
        let mut position = self.reader.lock().await;

        loop {
            let front = self.lock_segments().sealed.front().copied();
            let segment = match front {
                Some(segment) => segment,
                None => {
                    // Nothing sealed yet: seal whatever has been written so far, if anything.
                    let mut active = self.writer.lock().await;
                    if active.size == 0 {
                        return Err(FailCacheError::NoData);
                    }
                    self.rotate_locked(&mut active).await?;
                    continue;
                }
            };

            if position.seq != segment.seq {
                *position = ReadPosition {
                    seq: segment.seq,
                    offset: 0,
                };
            }

            if position.offset >= segment.size {
                self.finish_segment(segment.seq).await?;
                continue;
            }

            let path = segment_path(&self.path, segment.seq);
            let data = match read_record(&path, position.offset, segment.size).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(path = %path.display(), offset = position.offset, "Corrupted disk cache segment. Skipping remainder.");
                    self.finish_segment(segment.seq).await?;
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Dropped for capacity while we were looking at it.
                    self.finish_segment(segment.seq).await?;
                    continue;
                }
                Err(e) => return Err(e).context(Io { path }),
            };

            let data_len = data.len() as u64;
            callback(data).await.context(Callback)?;

            position.offset += RECORD_HEADER_LEN + data_len;
            if position.offset >= segment.size {
                self.finish_segment(segment.seq).await?;
            }
            self.persist_position(&position).await?;

            counter!("diskcache_get_total", "path" => self.path_label.clone()).increment(1);
            counter!("diskcache_get_bytes_total", "path" => self.path_label.clone()).increment(data_len);

            return Ok(());
        }
    }

    async fn rotate(&self) -> Result<(), FailCacheError> {
        let mut active = self.writer.lock().await;
        self.rotate_locked(&mut active).await
    }
}

fn segment_path(root: &Path, seq: u64) -> PathBuf {
    root.join(format!("{}.{:08}", ACTIVE_SEGMENT_NAME, seq))
}

fn parse_segment_seq(file_name: &str) -> Option<u64> {
    let (name, seq) = file_name.split_once('.')?;
    if name != ACTIVE_SEGMENT_NAME || seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    seq.parse().ok()
}

async fn scan_sealed_segments(root: &Path) -> Result<VecDeque<Segment>, FailCacheError> {
    let mut segments = Vec::new();

    let mut dir_reader = tokio::fs::read_dir(root).await.context(Io { path: root.to_path_buf() })?;
    while let Some(entry) = dir_reader
        .next_entry()
        .await
        .context(Io { path: root.to_path_buf() })?
    {
        let file_name = entry.file_name();
        let Some(seq) = file_name.to_str().and_then(parse_segment_seq) else {
            continue;
        };

        let metadata = entry.metadata().await.context(Io { path: entry.path() })?;
        if metadata.is_file() {
            segments.push(Segment {
                seq,
                size: metadata.len(),
            });
        }
    }

    segments.sort_by_key(|s| s.seq);
    Ok(segments.into())
}

async fn open_active(path: &Path) -> Result<File, FailCacheError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .context(Io { path: path.to_path_buf() })
}

async fn read_position(root: &Path) -> ReadPosition {
    match tokio::fs::read(root.join(POSITION_FILE_NAME)).await {
        Ok(buf) => ReadPosition::decode(&buf).unwrap_or_default(),
        Err(_) => ReadPosition::default(),
    }
}

async fn remove_segment_file(path: &Path) -> Result<(), FailCacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(Io { path: path.to_path_buf() }),
    }
}

/// Reads the record at `offset`, returning `None` if the segment is truncated or the record is malformed.
async fn read_record(path: &Path, offset: u64, segment_size: u64) -> io::Result<Option<Bytes>> {
    if offset + RECORD_HEADER_LEN > segment_size {
        return Ok(None);
    }

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut header = [0; RECORD_HEADER_LEN as usize];
    match file.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(header) as u64;
    if offset + RECORD_HEADER_LEN + len > segment_size {
        return Ok(None);
    }

    let mut data = vec![0; len as usize];
    match file.read_exact(&mut data).await {
        Ok(_) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

use memmap2::Mmap;
use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mcap::read::{MessageStream, Options};
use mcap::sans_io::{IndexedReadEvent, IndexedReader, IndexedReaderOptions};
use mcap::{McapError, Summary};

use super::connection::{Connection, Record};
use super::error::BagError;
use crate::shared::constants;
use crate::utils::file_utils;

struct BagFile {
    path: PathBuf,
    mmap: Mmap,
    /// Summary with chunk indexes; `None` means the file can only be read front to back.
    index: Option<Summary>,
    /// The summary could not be read, so the file is assumed cut short.
    damaged: bool,
}

/// Read access to a single `.mcap` file or a ROS 2 bag directory of split `.mcap` files.
pub struct BagReader {
    path: PathBuf,
    files: Vec<BagFile>,
    connections: Vec<Arc<Connection>>,
}

impl BagReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BagError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(BagError::NotFound(path));
        }

        let file_paths = if path.is_dir() {
            let files = file_utils::list_files(&path, constants::MCAP_EXTENSION).map_err(|source| {
                BagError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
            if files.is_empty() {
                return Err(BagError::NoMcapFiles(path));
            }
            files
        } else {
            vec![path.clone()]
        };

        let mut files = Vec::with_capacity(file_paths.len());
        let mut connections = Vec::new();
        for (file_index, file_path) in file_paths.into_iter().enumerate() {
            let mmap = map_file(&file_path)?;
            let (summary, damaged) = read_summary(&file_path, &mmap);
            connections.extend(read_connections(&file_path, file_index, &mmap, summary.as_ref(), damaged)?);
            files.push(BagFile {
                path: file_path,
                mmap,
                index: summary.filter(|s| !s.chunk_indexes.is_empty()),
                damaged,
            });
        }

        crate::utils::logger::debug(&format!(
            "opened bag {:?}: {} file(s), {} connection(s)",
            path,
            files.len(),
            connections.len()
        ));

        Ok(Self {
            path,
            files,
            connections: connections.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connections(&self) -> &[Arc<Connection>] {
        &self.connections
    }

    /// Distinct topic names in the order they first appear.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for connection in &self.connections {
            if !topics.contains(&connection.topic) {
                topics.push(connection.topic.clone());
            }
        }
        topics
    }

    pub fn message_count<F>(&self, filter: F) -> u64
    where
        F: Fn(&Connection) -> bool,
    {
        self.connections
            .iter()
            .filter(|c| filter(c))
            .map(|c| c.msgcount)
            .sum()
    }

    /// Records on the connections accepted by `filter`, ordered by log time across all files.
    /// Equal log times keep file order. Files without chunk indexes are read in write order.
    pub fn messages<F>(&self, filter: F) -> Messages<'_>
    where
        F: Fn(&Connection) -> bool,
    {
        let selected = self
            .connections
            .iter()
            .filter(|c| filter(c))
            .map(|c| ((c.file_index, c.channel_id), Arc::clone(c)))
            .collect();

        Messages {
            files: &self.files,
            selected,
            cursors: None,
            heads: BinaryHeap::new(),
            pending_error: None,
            failed: false,
        }
    }
}

fn mcap_error(path: &Path, source: McapError) -> BagError {
    BagError::Mcap {
        path: path.to_path_buf(),
        source,
    }
}

fn warn_truncated(path: &Path, source: &McapError) {
    crate::utils::logger::warn(&format!(
        "{}: stopped at damaged tail ({}); later records are lost",
        path.display(),
        source
    ));
}

fn map_file(path: &Path) -> Result<Mmap, BagError> {
    let file = File::open(path).map_err(|source| BagError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // SAFETY: the map is read-only and bags are not modified while being read
    unsafe { Mmap::map(&file) }.map_err(|source| BagError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// A summary that fails to parse (missing footer, bad end magic) marks the file as damaged.
fn read_summary(path: &Path, data: &[u8]) -> (Option<Summary>, bool) {
    match Summary::read(data) {
        Ok(summary) => (summary, false),
        Err(e) => {
            crate::utils::logger::warn(&format!(
                "{}: unreadable summary ({}), scanning records",
                path.display(),
                e
            ));
            (None, true)
        }
    }
}

fn linear_stream<'a>(path: &Path, data: &'a [u8], damaged: bool) -> Result<MessageStream<'a>, BagError> {
    let stream = if damaged {
        MessageStream::new_with_options(data, Options::IgnoreEndMagic.into())
    } else {
        MessageStream::new(data)
    };
    stream.map_err(|source| mcap_error(path, source))
}

fn read_connections(
    path: &Path,
    file_index: usize,
    data: &[u8],
    summary: Option<&Summary>,
    damaged: bool,
) -> Result<Vec<Connection>, BagError> {
    if let Some(summary) = summary {
        if let Some(stats) = &summary.stats {
            let mut connections: Vec<Connection> = summary
                .channels
                .values()
                .map(|channel| {
                    let count = stats
                        .channel_message_counts
                        .get(&channel.id)
                        .copied()
                        .unwrap_or(0);
                    Connection::from_channel(channel, file_index, count)
                })
                .collect();
            connections.sort_by_key(|c| c.channel_id);
            return Ok(connections);
        }
    }

    // no statistics record: count by walking every message once
    let mut scanned: BTreeMap<u16, Connection> = BTreeMap::new();
    for message in linear_stream(path, data, damaged)? {
        let message = match message {
            Ok(message) => message,
            Err(source) if damaged => {
                warn_truncated(path, &source);
                break;
            }
            Err(source) => return Err(mcap_error(path, source)),
        };
        scanned
            .entry(message.channel.id)
            .or_insert_with(|| Connection::from_channel(&message.channel, file_index, 0))
            .msgcount += 1;
    }
    Ok(scanned.into_values().collect())
}

enum Source<'a> {
    Indexed(IndexedReader),
    Linear(MessageStream<'a>),
}

/// Read position within one file of the bag, holding its next selected record.
struct FileCursor<'a> {
    file: &'a BagFile,
    file_index: usize,
    source: Source<'a>,
    head: Option<Record<'a>>,
}

impl<'a> FileCursor<'a> {
    fn open(
        file: &'a BagFile,
        file_index: usize,
        selected: &HashMap<(usize, u16), Arc<Connection>>,
    ) -> Result<Self, BagError> {
        let source = match &file.index {
            Some(summary) => {
                let topics: Vec<String> = selected
                    .values()
                    .filter(|c| c.file_index == file_index)
                    .map(|c| c.topic.clone())
                    .collect();
                let options = IndexedReaderOptions::new().include_topics(topics);
                let reader =
                    IndexedReader::new_with_options(summary, options).map_err(|source| mcap_error(&file.path, source))?;
                Source::Indexed(reader)
            }
            None => Source::Linear(linear_stream(&file.path, &file.mmap[..], file.damaged)?),
        };

        Ok(Self {
            file,
            file_index,
            source,
            head: None,
        })
    }

    /// Next selected record of this file, `None` once it is exhausted.
    fn advance(&mut self, selected: &HashMap<(usize, u16), Arc<Connection>>) -> Result<Option<Record<'a>>, BagError> {
        let file = self.file;
        match &mut self.source {
            Source::Indexed(reader) => loop {
                let (offset, length) = match reader.next_event() {
                    None => return Ok(None),
                    Some(Err(source)) => return Err(mcap_error(&file.path, source)),
                    Some(Ok(IndexedReadEvent::Message { header, data })) => {
                        match selected.get(&(self.file_index, header.channel_id)) {
                            Some(connection) => {
                                return Ok(Some(Record {
                                    connection: Arc::clone(connection),
                                    timestamp: header.log_time,
                                    data: Cow::Owned(data.to_vec()),
                                }))
                            }
                            None => continue,
                        }
                    }
                    Some(Ok(IndexedReadEvent::ReadChunkRequest { offset, length })) => (offset, length),
                };

                let start = offset as usize;
                let chunk = file
                    .mmap
                    .get(start..start.saturating_add(length))
                    .ok_or_else(|| mcap_error(&file.path, McapError::BadIndex))?;
                reader
                    .insert_chunk_record_data(offset, chunk)
                    .map_err(|source| mcap_error(&file.path, source))?;
            },
            Source::Linear(stream) => loop {
                match stream.next() {
                    None => return Ok(None),
                    Some(Err(source)) if file.damaged => {
                        warn_truncated(&file.path, &source);
                        return Ok(None);
                    }
                    Some(Err(source)) => return Err(mcap_error(&file.path, source)),
                    Some(Ok(message)) => {
                        if let Some(connection) = selected.get(&(self.file_index, message.channel.id)) {
                            return Ok(Some(Record {
                                connection: Arc::clone(connection),
                                timestamp: message.log_time,
                                data: message.data,
                            }));
                        }
                    }
                }
            },
        }
    }
}

/// Lazy iterator over the selected records of a bag, merging split files by log time.
/// Holds at most one decoded record per file plus the chunks being read.
pub struct Messages<'a> {
    files: &'a [BagFile],
    selected: HashMap<(usize, u16), Arc<Connection>>,
    cursors: Option<Vec<FileCursor<'a>>>,
    /// (log time, cursor slot) of every cursor holding a record.
    heads: BinaryHeap<Reverse<(u64, usize)>>,
    pending_error: Option<BagError>,
    failed: bool,
}

impl<'a> Messages<'a> {
    fn start(&mut self) -> Result<(), BagError> {
        let files = self.files;
        let mut cursors = Vec::new();
        for (file_index, file) in files.iter().enumerate() {
            if !self.selected.keys().any(|(index, _)| *index == file_index) {
                continue;
            }
            let mut cursor = FileCursor::open(file, file_index, &self.selected)?;
            if let Some(record) = cursor.advance(&self.selected)? {
                self.heads.push(Reverse((record.timestamp, cursors.len())));
                cursor.head = Some(record);
                cursors.push(cursor);
            }
        }
        self.cursors = Some(cursors);
        Ok(())
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<Record<'a>, BagError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.selected.is_empty() {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }
        if self.cursors.is_none() {
            if let Err(e) = self.start() {
                self.failed = true;
                return Some(Err(e));
            }
        }

        let Reverse((_, slot)) = self.heads.pop()?;
        let cursor = self.cursors.as_mut()?.get_mut(slot)?;
        let record = cursor.head.take()?;
        match cursor.advance(&self.selected) {
            Ok(Some(next)) => {
                self.heads.push(Reverse((next.timestamp, slot)));
                cursor.head = Some(next);
            }
            Ok(None) => {}
            // hand out the record already read; the error follows on the next call
            Err(e) => self.pending_error = Some(e),
        }
        Some(Ok(record))
    }
}

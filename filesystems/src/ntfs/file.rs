//! `File`: a façade over a resolved [`MftEntry`] plus its owning [`Mft`],
//! exposing name/size/parent/listing/read as a coherent read-only view.

use std::rc::Rc;

use regex::Regex;

use relic_core::{RelicError, Result};

use super::attributes::{AttributeBody, DataAttribute, FileNameAttribute, FILE_NAME_DOS};
use super::data_runs::DataRun;
use super::index;
use super::mft::{Mft, MftEntry};
use super::structures::ATTR_TYPE_DATA;

const MIME_TABLE: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("xml", "application/xml"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("exe", "application/x-msdownload"),
    ("dll", "application/x-msdownload"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
];

/// A name filter for [`File::list`]: glob pattern or compiled regex,
/// mutually exclusive by construction.
pub enum NameFilter<'a> {
    Pattern(&'a str),
    Regex(&'a Regex),
}

impl<'a> NameFilter<'a> {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::Pattern(p) => glob::Pattern::new(p).map(|pat| pat.matches(name)).unwrap_or(false),
            NameFilter::Regex(re) => re.is_match(name),
        }
    }
}

#[derive(Clone)]
pub struct File {
    mft: Rc<Mft>,
    entry: Rc<MftEntry>,
}

impl File {
    pub fn new(mft: Rc<Mft>, entry: Rc<MftEntry>) -> Self {
        File { mft, entry }
    }

    pub fn inode(&self) -> u64 {
        self.entry.inode
    }

    pub fn is_dir(&self) -> bool {
        self.entry.is_dir
    }

    pub fn is_file(&self) -> bool {
        self.entry.in_use && !self.entry.is_dir
    }

    pub fn is_allocated(&self) -> bool {
        self.entry.in_use
    }

    fn file_names(&self) -> impl Iterator<Item = &FileNameAttribute> {
        self.entry.attrs.iter().filter_map(|a| match &a.body {
            AttributeBody::FileName(f) => Some(f),
            _ => None,
        })
    }

    fn data_attrs(&self) -> impl Iterator<Item = &DataAttribute> {
        self.entry.attrs.iter().filter_map(|a| {
            if a.type_id == ATTR_TYPE_DATA && a.name.is_empty() {
                match &a.body {
                    AttributeBody::Data(d) => Some(d),
                    _ => None,
                }
            } else {
                None
            }
        })
    }

    /// Win32 (or Win32+DOS) name first, else DOS-only, else whatever is
    /// available, else an empty string.
    pub fn name(&self) -> String {
        let names: Vec<&FileNameAttribute> = self.file_names().collect();
        names
            .iter()
            .find(|f| f.namespace & 1 != 0)
            .or_else(|| names.iter().find(|f| f.namespace == FILE_NAME_DOS))
            .or_else(|| names.first())
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }

    pub fn size(&self) -> u64 {
        self.data_attrs()
            .map(|d| match d {
                DataAttribute::Resident(bytes) => bytes.len() as u64,
                DataAttribute::NonResident { actual_size, .. } => *actual_size,
            })
            .sum()
    }

    pub fn allocated_size(&self) -> u64 {
        self.data_attrs()
            .map(|d| match d {
                DataAttribute::Resident(bytes) => bytes.len() as u64,
                DataAttribute::NonResident { allocated_size, .. } => *allocated_size,
            })
            .sum()
    }

    /// A named alternate data stream, e.g. `Zone.Identifier`.
    pub fn data_stream(&self, name: &str) -> Option<&DataAttribute> {
        self.entry.attrs.iter().find_map(|a| {
            if a.type_id == ATTR_TYPE_DATA && a.name == name {
                match &a.body {
                    AttributeBody::Data(d) => Some(d),
                    _ => None,
                }
            } else {
                None
            }
        })
    }

    /// `None` once the walk reaches a self-parented entry (inode 5, the
    /// volume root).
    pub fn parent(&self) -> Result<Option<File>> {
        let Some(parent_ref) = self.file_names().next().map(|f| f.parent) else {
            return Ok(None);
        };
        if parent_ref.inode == self.entry.inode {
            return Ok(None);
        }
        let parent_entry = self.mft.find(parent_ref.inode)?;
        Ok(Some(File { mft: self.mft.clone(), entry: parent_entry }))
    }

    pub fn fullpath(&self) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = self.clone();
        loop {
            match current.parent()? {
                None => break,
                Some(parent) => {
                    parts.push(current.name());
                    current = parent;
                }
            }
        }
        if parts.is_empty() {
            return Ok("/".to_string());
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    /// Best-effort extension-based guess; `None` for unrecognised or
    /// missing extensions. Not content-sniffing.
    pub fn mime(&self) -> Option<&'static str> {
        let name = self.name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        let ext = ext.to_ascii_lowercase();
        MIME_TABLE.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m)
    }

    /// Lists directory entries. Non-directories yield nothing. Recursion
    /// never re-enters the directory itself.
    pub fn list(&self, recursive: bool, filter: Option<&NameFilter>) -> Result<Vec<File>> {
        if !self.entry.is_dir {
            return Ok(Vec::new());
        }
        let root_attr = self.entry.attrs.iter().find_map(|a| match &a.body {
            AttributeBody::IndexRoot(r) => Some(r),
            _ => None,
        });
        let Some(root_attr) = root_attr else {
            return Ok(Vec::new());
        };
        let allocation = self.entry.attrs.iter().find_map(|a| match &a.body {
            AttributeBody::IndexAllocation { bytes, .. } => Some(bytes.as_slice()),
            _ => None,
        });
        let sector_size = self.mft.boot().bytes_per_sector();
        let entries = index::walk_directory(root_attr, allocation, sector_size)?;

        let mut results = Vec::new();
        for e in entries {
            let Some(file_ref) = e.file_ref else { continue };
            if file_ref.inode == self.entry.inode {
                continue;
            }
            let child_entry = self.mft.find(file_ref.inode)?;
            let child = File { mft: self.mft.clone(), entry: child_entry };
            let matches = filter.map(|f| f.matches(&child.name())).unwrap_or(true);
            if matches {
                results.push(child.clone());
            }
            if recursive && child.is_dir() {
                results.extend(child.list(true, filter)?);
            }
        }
        Ok(results)
    }

    /// Lazily stitches `count*bsize` bytes starting `skip*bsize` bytes
    /// into the file across the unnamed `$DATA` attribute(s)' data runs,
    /// in `starting_vcn` order. Sparse runs yield zero-filled chunks.
    pub fn read(&self, count: u64, skip: u64, bsize: u64) -> Result<ReadChunks> {
        let s = skip.saturating_mul(bsize);
        let r = count.saturating_mul(bsize);

        if let Some(DataAttribute::Resident(bytes)) = self.data_attrs().next() {
            let len = bytes.len() as u64;
            let start = s.min(len) as usize;
            let end = s.saturating_add(r).min(len) as usize;
            return Ok(ReadChunks {
                runs: Vec::new().into_iter(),
                volume: self.mft.volume().clone(),
                cluster_size: 1,
                resident: Some(bytes[start..end].to_vec()),
                skip: 0,
                remaining: 0,
            });
        }

        let mut per_attr: Vec<(u64, Vec<DataRun>)> = Vec::new();
        for a in &self.entry.attrs {
            if a.type_id == ATTR_TYPE_DATA && a.name.is_empty() {
                if let AttributeBody::Data(DataAttribute::NonResident { starting_vcn, vcn, .. }) = &a.body {
                    per_attr.push((*starting_vcn, vcn.runs.clone()));
                }
            }
        }
        per_attr.sort_by_key(|(starting_vcn, _)| *starting_vcn);
        let runs: Vec<DataRun> = per_attr.into_iter().flat_map(|(_, runs)| runs).collect();

        Ok(ReadChunks {
            runs: runs.into_iter(),
            volume: self.mft.volume().clone(),
            cluster_size: self.mft.boot().bytes_per_cluster() as u64,
            resident: None,
            skip: s,
            remaining: r,
        })
    }

    /// The whole unnamed `$DATA` content, joined. Equivalent to
    /// `read(size(), 0, 1)` concatenated; for large files prefer `read`
    /// directly to stay lazy.
    pub fn data(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size() as usize);
        for chunk in self.read(self.size(), 0, 1)? {
            out.extend(chunk?);
        }
        Ok(out)
    }

    pub fn slack_space(&self) -> Result<Vec<u8>> {
        let size = self.size();
        let allocated = self.allocated_size();
        if allocated <= size {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for chunk in self.read(allocated - size, size, 1)? {
            out.extend(chunk?);
        }
        Ok(out)
    }

    /// Whether any non-sparse run of any unnamed `$DATA` attribute covers
    /// the given physical cluster.
    pub fn contains(&self, cluster: u64) -> bool {
        self.data_attrs().any(|d| match d {
            DataAttribute::NonResident { vcn, .. } => vcn.contains_cluster(cluster),
            DataAttribute::Resident(_) => false,
        })
    }
}

pub struct ReadChunks {
    runs: std::vec::IntoIter<DataRun>,
    volume: relic_core::ByteWindow,
    cluster_size: u64,
    resident: Option<Vec<u8>>,
    skip: u64,
    remaining: u64,
}

impl Iterator for ReadChunks {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(bytes) = self.resident.take() {
            if bytes.is_empty() {
                return None;
            }
            return Some(Ok(bytes));
        }

        while self.remaining > 0 {
            let run = self.runs.next()?;
            let run_bytes = run.length * self.cluster_size;
            if self.skip >= run_bytes {
                self.skip -= run_bytes;
                continue;
            }
            let to_read = std::cmp::min(self.skip + self.remaining, run_bytes);
            let result = match run.offset {
                None => Ok(vec![0u8; (to_read - self.skip) as usize]),
                Some(lcn) if lcn >= 0 => self
                    .volume
                    .read(to_read, Some(lcn as u64 * self.cluster_size))
                    .map(|buf| buf[self.skip as usize..].to_vec()),
                Some(lcn) => Err(RelicError::MalformedField {
                    context: "data run".into(),
                    field: "offset".into(),
                    detail: format!("negative absolute LCN {}", lcn),
                }),
            };
            self.remaining -= to_read - self.skip;
            self.skip = 0;
            return Some(result);
        }
        None
    }
}

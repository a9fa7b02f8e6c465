//! Resource resolution and input decoding.
//!
//! Locations in a [`Configuration`](crate::config::Configuration) are opaque
//! strings. A [`ResourceResolver`] turns each one into zero or more
//! [`Resource`]s, preserving order; [`FileSystemResolver`] treats locations as
//! paths relative to a base directory. [`LocationConventions`] fills in the
//! defaults used when a test unit declares no location of its own.

use std::{
    borrow::Cow,
    fs::{self, File},
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use log::debug;

use crate::error::{FixtureError, Result};

pub const DEFAULT_DATASET_NAME: &str = "dataSet.xml";
pub const DEFAULT_EXPECTED_DATASET_NAME: &str = "expectedDataSet.xml";

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| FixtureError::configuration(format!("Unknown encoding '{value}'"))),
        None => Ok(UTF_8),
    }
}

/// Where one dataset document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Content {
    /// Opened on every read; nothing is held in memory beforehand.
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// One dataset document plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    location: String,
    content: Content,
}

impl Resource {
    pub fn from_bytes(location: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            location: location.into(),
            content: Content::Bytes(bytes.into()),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self {
            location: path.display().to_string(),
            content: Content::File(path.to_path_buf()),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.content {
            Content::File(path) => Some(path),
            Content::Bytes(_) => None,
        }
    }

    /// In-memory content; `None` for file-backed resources.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Content::File(_) => None,
            Content::Bytes(bytes) => Some(bytes),
        }
    }

    /// File name without directories or extension.
    pub fn stem(&self) -> String {
        let name = self
            .location
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.location);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name.to_string(),
        }
    }

    /// Reader yielding UTF-8, transcoding from `encoding` (a BOM wins).
    /// File-backed resources are streamed from disk.
    pub fn reader(&self, encoding: Option<&str>) -> Result<Box<dyn BufRead + '_>> {
        let encoding = resolve_encoding(encoding)?;
        let mut builder = DecodeReaderBytesBuilder::new();
        builder.encoding(Some(encoding));
        match &self.content {
            Content::File(path) => {
                let file = File::open(path).map_err(|err| self.open_error(path, err))?;
                Ok(Box::new(BufReader::new(builder.build(file))))
            }
            Content::Bytes(bytes) => Ok(Box::new(BufReader::new(builder.build(bytes.as_slice())))),
        }
    }

    pub fn read_to_string(&self, encoding: Option<&str>) -> Result<String> {
        let encoding = resolve_encoding(encoding)?;
        let bytes = match &self.content {
            Content::File(path) => Cow::Owned(fs::read(path).map_err(|err| self.open_error(path, err))?),
            Content::Bytes(bytes) => Cow::Borrowed(bytes.as_slice()),
        };
        let (text, _, had_errors) = encoding.decode(&bytes);
        if had_errors {
            return Err(FixtureError::malformed(format!(
                "{}: failed to decode text with encoding {}",
                self.location,
                encoding.name()
            )));
        }
        Ok(text.into_owned())
    }

    fn open_error(&self, path: &Path, err: io::Error) -> FixtureError {
        FixtureError::configuration(format!(
            "Dataset resource '{}' could not be read from {}: {err}",
            self.location,
            path.display()
        ))
    }
}

pub trait ResourceResolver {
    /// Resolves one location into resources, in a stable order. A location
    /// matching nothing is an error.
    fn resolve(&self, location: &str) -> Result<Vec<Resource>>;

    fn resolve_all(&self, locations: &[String]) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        for location in locations {
            resources.extend(self.resolve(location)?);
        }
        Ok(resources)
    }
}

/// Resolves locations as file-system paths relative to a base directory.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    base: PathBuf,
}

impl FileSystemResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ResourceResolver for FileSystemResolver {
    fn resolve(&self, location: &str) -> Result<Vec<Resource>> {
        let relative = location.strip_prefix("file:").unwrap_or(location);
        let path = self.base.join(relative);
        if !path.is_file() {
            return Err(FixtureError::configuration(format!(
                "Dataset resource '{location}' not found (looked for {})",
                path.display()
            )));
        }
        debug!("Resolved '{location}' to {}", path.display());
        Ok(vec![Resource::from_path(&path)])
    }
}

/// In-memory resolver keyed by exact location.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    entries: Vec<Resource>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: &str, content: impl Into<Vec<u8>>) -> Self {
        self.entries.push(Resource::from_bytes(location, content));
        self
    }
}

impl ResourceResolver for MemoryResolver {
    fn resolve(&self, location: &str) -> Result<Vec<Resource>> {
        let matches = self
            .entries
            .iter()
            .filter(|resource| resource.location() == location)
            .cloned()
            .collect::<Vec<_>>();
        if matches.is_empty() {
            return Err(FixtureError::configuration(format!(
                "Dataset resource '{location}' not found"
            )));
        }
        Ok(matches)
    }
}

/// Default locations for a test unit.
///
/// A unit is identified by a path-like name such as `com/acme/UserTest`; its
/// directory (`com/acme`) is where relative locations are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationConventions {
    unit_directory: String,
}

impl LocationConventions {
    pub fn for_unit(unit: &str) -> Self {
        let normalized = unit.replace('\\', "/");
        let unit_directory = match normalized.rsplit_once('/') {
            Some((directory, _)) => directory.to_string(),
            None => String::new(),
        };
        Self { unit_directory }
    }

    pub fn unit_directory(&self) -> &str {
        &self.unit_directory
    }

    /// Applies the conventions to declared `locations`: an empty list becomes
    /// the default dataset next to the unit, relative entries are prefixed
    /// with the unit's directory, and absolute (`/...`) entries are kept with
    /// the leading slash removed.
    pub fn apply(&self, locations: &[String]) -> Vec<String> {
        if locations.is_empty() {
            return vec![self.qualify(DEFAULT_DATASET_NAME)];
        }
        locations
            .iter()
            .map(|location| match location.strip_prefix('/') {
                Some(absolute) => absolute.to_string(),
                None => self.qualify(location),
            })
            .collect()
    }

    pub fn expected_location(&self) -> String {
        self.qualify(DEFAULT_EXPECTED_DATASET_NAME)
    }

    fn qualify(&self, name: &str) -> String {
        if self.unit_directory.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.unit_directory)
        }
    }
}

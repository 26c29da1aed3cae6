//! I/O helpers for reading delimited text and persisting artifacts.
//!
//! - **Encoding sniffing**: byte-order mark first, then UTF-8 validity of the
//!   probed prefix, falling back to `windows-1252`.
//! - **Delimiter detection**: the most frequent candidate on the first line.
//! - **Decoding**: whole-file decoding through `encoding_rs_io`.
//! - **Staged writes**: artifacts land in a run-scoped temporary sibling and
//!   are renamed into place on commit, so readers never observe partial files.

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use encoding_rs_io::DecodeReaderBytesBuilder;
use log::debug;

use crate::error::{PipelineError, Result};

pub const DELIMITER_CANDIDATES: &[u8] = b",;\t|:";
pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffedEncoding {
    pub encoding: &'static Encoding,
    /// Label reported to callers; `ascii` when the probe is plain 7-bit text.
    pub label: &'static str,
}

pub fn sniff_encoding(probe: &[u8]) -> SniffedEncoding {
    if let Some((encoding, _)) = Encoding::for_bom(probe) {
        return SniffedEncoding {
            encoding,
            label: encoding.name(),
        };
    }
    if probe.is_ascii() {
        return SniffedEncoding {
            encoding: UTF_8,
            label: "ascii",
        };
    }
    match std::str::from_utf8(probe) {
        Ok(_) => SniffedEncoding {
            encoding: UTF_8,
            label: UTF_8.name(),
        },
        // A multi-byte sequence cut off by the probe boundary is still UTF-8.
        Err(err) if err.error_len().is_none() => SniffedEncoding {
            encoding: UTF_8,
            label: UTF_8.name(),
        },
        Err(_) => SniffedEncoding {
            encoding: WINDOWS_1252,
            label: WINDOWS_1252.name(),
        },
    }
}

pub fn read_probe(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path)
        .map_err(|err| PipelineError::ingestion(format!("Opening input file {path:?}: {err}")))?;
    let mut probe = Vec::with_capacity(limit);
    file.take(limit as u64)
        .read_to_end(&mut probe)
        .map_err(|err| PipelineError::ingestion(format!("Reading input file {path:?}: {err}")))?;
    Ok(probe)
}

pub fn read_decoded(path: &Path, encoding: &'static Encoding) -> Result<String> {
    let file = File::open(path)
        .map_err(|err| PipelineError::ingestion(format!("Opening input file {path:?}: {err}")))?;
    let mut reader = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .bom_override(true)
        .strip_bom(true)
        .build(BufReader::new(file));
    let mut text = String::new();
    reader.read_to_string(&mut text).map_err(|err| {
        PipelineError::ingestion(format!(
            "Decoding {path:?} as {}: {err}",
            encoding.name()
        ))
    })?;
    Ok(text)
}

/// Picks the candidate occurring most often in `line`; ties keep the earlier
/// candidate, so a line without any candidate yields a comma.
pub fn detect_delimiter(line: &str) -> u8 {
    let mut best = DEFAULT_CSV_DELIMITER;
    let mut best_count = 0usize;
    for &candidate in DELIMITER_CANDIDATES {
        let count = line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}

pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// An artifact written to `<target>.<run_id>.tmp` and moved into place by
/// [`StagedFile::commit`].
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    temp: PathBuf,
}

impl StagedFile {
    pub fn create(target: &Path, run_id: &str) -> Result<(Self, File)> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PipelineError::storage(format!("Creating directory {parent:?}: {err}"))
            })?;
        }
        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PipelineError::storage(format!("Invalid artifact path {target:?}")))?;
        let temp = target.with_file_name(format!("{file_name}.{run_id}.tmp"));
        let file = File::create(&temp)
            .map_err(|err| PipelineError::storage(format!("Creating file {temp:?}: {err}")))?;
        Ok((
            Self {
                target: target.to_path_buf(),
                temp,
            },
            file,
        ))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn size(&self) -> Result<u64> {
        fs::metadata(&self.temp)
            .map(|meta| meta.len())
            .map_err(|err| PipelineError::storage(format!("Reading size of {:?}: {err}", self.temp)))
    }

    pub fn commit(self) -> Result<PathBuf> {
        fs::rename(&self.temp, &self.target).map_err(|err| {
            PipelineError::storage(format!(
                "Moving {:?} into place at {:?}: {err}",
                self.temp, self.target
            ))
        })?;
        debug!("Committed artifact {:?}", self.target);
        Ok(self.target)
    }

    pub fn discard(self) {
        if let Err(err) = fs::remove_file(&self.temp) {
            debug!("Could not remove staged file {:?}: {err}", self.temp);
        }
    }
}

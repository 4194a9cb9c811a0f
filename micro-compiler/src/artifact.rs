//! Model blob assembly and staged artifact writes.
//!
//! Blob layout: six little-endian `i64` header fields
//! `[net_def_offset, graph_offset, weights_offset, weights_end, tensor_mem_size, scratch_buffer_size]`
//! followed by `net_def || graph || weights`. `weights_end` is the blob length.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const HEADER_FIELDS: usize = 6;
pub const HEADER_LEN: usize = HEADER_FIELDS * 8;

/// Section offsets of an assembled blob, plus the runtime sizes it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub net_def_offset: usize,
    pub graph_offset: usize,
    pub weights_offset: usize,
    pub weights_end: usize,
    pub tensor_mem_size: usize,
    pub scratch_buffer_size: usize,
}

impl ArtifactLayout {
    pub fn net_def(&self) -> Range<usize> {
        self.net_def_offset..self.graph_offset
    }

    pub fn graph(&self) -> Range<usize> {
        self.graph_offset..self.weights_offset
    }

    pub fn weights(&self) -> Range<usize> {
        self.weights_offset..self.weights_end
    }

    fn fields(&self) -> [usize; HEADER_FIELDS] {
        [
            self.net_def_offset,
            self.graph_offset,
            self.weights_offset,
            self.weights_end,
            self.tensor_mem_size,
            self.scratch_buffer_size,
        ]
    }
}

/// Concatenate the header and sections into one blob.
pub fn assemble(
    net_def: &[u8],
    graph: &[u8],
    weights: &[u8],
    tensor_mem_size: usize,
    scratch_buffer_size: usize,
) -> Result<(Vec<u8>, ArtifactLayout)> {
    let net_def_offset = HEADER_LEN;
    let graph_offset = net_def_offset + net_def.len();
    let weights_offset = graph_offset + graph.len();
    let layout = ArtifactLayout {
        net_def_offset,
        graph_offset,
        weights_offset,
        weights_end: weights_offset + weights.len(),
        tensor_mem_size,
        scratch_buffer_size,
    };

    let mut blob = Vec::with_capacity(layout.weights_end);
    for value in layout.fields() {
        let value = i64::try_from(value).map_err(|_| {
            Error::malformed("artifact header", format!("{value} does not fit in i64"))
        })?;
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob.extend_from_slice(net_def);
    blob.extend_from_slice(graph);
    blob.extend_from_slice(weights);
    debug_assert_eq!(blob.len(), layout.weights_end);

    log::debug!(
        "blob: header {HEADER_LEN} + net_def {} + graph {} + weights {} = {} bytes",
        net_def.len(),
        graph.len(),
        weights.len(),
        blob.len()
    );
    Ok((blob, layout))
}

/// Read-back view of an assembled blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub layout: ArtifactLayout,
}

impl BlobHeader {
    /// Parse and check the header against the blob it came from.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < HEADER_LEN {
            return Err(Error::MalformedRecord(format!(
                "blob of {} bytes is shorter than the {HEADER_LEN}-byte header",
                blob.len()
            )));
        }
        let mut fields = [0usize; HEADER_FIELDS];
        for (i, field) in fields.iter_mut().enumerate() {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&blob[i * 8..i * 8 + 8]);
            let value = i64::from_le_bytes(raw);
            *field = usize::try_from(value).map_err(|_| {
                Error::MalformedRecord(format!("header field {i} is negative ({value})"))
            })?;
        }
        let [net_def_offset, graph_offset, weights_offset, weights_end, tensor_mem_size, scratch_buffer_size] =
            fields;

        let ordered = net_def_offset == HEADER_LEN
            && net_def_offset <= graph_offset
            && graph_offset <= weights_offset
            && weights_offset <= weights_end;
        if !ordered || weights_end != blob.len() {
            return Err(Error::MalformedRecord(format!(
                "inconsistent section offsets {:?} for a {}-byte blob",
                &fields[..4],
                blob.len()
            )));
        }

        Ok(Self {
            layout: ArtifactLayout {
                net_def_offset,
                graph_offset,
                weights_offset,
                weights_end,
                tensor_mem_size,
                scratch_buffer_size,
            },
        })
    }
}

/// Collects output files and makes them visible together.
///
/// Every file is first written next to its destination as `<name>.tmp`;
/// [`commit`](Self::commit) renames them into place. Dropping an uncommitted
/// writer removes whatever was staged.
#[derive(Debug, Default)]
pub struct ArtifactWriter {
    staged: Vec<(PathBuf, PathBuf)>,
    committed: bool,
}

impl ArtifactWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, path: impl Into<PathBuf>, contents: &[u8]) -> Result<()> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let tmp = tmp_path(&path);
        if let Err(e) = fs::write(&tmp, contents) {
            remove_quietly(&tmp);
            return Err(Error::io(&tmp, e));
        }
        self.staged.push((tmp, path));
        Ok(())
    }

    pub fn staged_paths(&self) -> impl Iterator<Item = &Path> {
        self.staged.iter().map(|(_, dest)| dest.as_path())
    }

    /// Move every staged file into place. If a rename fails, the files this
    /// commit already moved are removed again.
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        let mut written: Vec<PathBuf> = Vec::with_capacity(self.staged.len());
        for (tmp, dest) in &self.staged {
            if let Err(e) = fs::rename(tmp, dest) {
                for path in &written {
                    remove_quietly(path);
                }
                return Err(Error::io(dest, e));
            }
            written.push(dest.clone());
        }
        self.committed = true;
        Ok(written)
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (tmp, _) in &self.staged {
            remove_quietly(tmp);
        }
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove {}: {err}", path.display()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

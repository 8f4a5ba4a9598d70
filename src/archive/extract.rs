use std::{
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tar::Archive;
use zip::read::ZipArchive;

use crate::app::error::GatewayError;

/// How matching entries are placed under the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Base name only; later entries with the same name win.
    Flatten,
    /// Keep the sub-path recorded in the archive.
    Preserve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarBz2,
}

#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub files: Vec<PathBuf>,
}

/// Extracts the entries of `archive_path` whose names end with `suffix`.
///
/// The archive is deleted afterwards whether or not extraction succeeded.
pub fn extract(
    archive_path: &Path,
    destination: &Path,
    suffix: &str,
    layout: Layout,
    clear_before_extract: bool,
) -> Result<ExtractOutcome, GatewayError> {
    let result = prepare_destination(destination, clear_before_extract).and_then(|()| {
        extract_matching(archive_path, destination, suffix, layout).map_err(GatewayError::extract)
    });

    if let Err(error) = fs::remove_file(archive_path) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                "Failed to remove archive {}: {error}",
                archive_path.display()
            );
        }
    }

    result
}

fn prepare_destination(destination: &Path, clear: bool) -> Result<(), GatewayError> {
    if clear && destination.exists() {
        fs::remove_dir_all(destination)
            .with_context(|| format!("clear destination {}", destination.display()))
            .map_err(GatewayError::filesystem)?;
    }
    crate::storage::ensure(destination)
}

fn extract_matching(
    archive_path: &Path,
    destination: &Path,
    suffix: &str,
    layout: Layout,
) -> Result<ExtractOutcome> {
    let mut file = File::open(archive_path)
        .with_context(|| format!("open archive {}", archive_path.display()))?;
    let format = sniff_format(&mut file)?;
    let target = Target {
        destination,
        suffix,
        layout,
    };
    let files = match format {
        ArchiveFormat::Zip => extract_zip(&target, file)?,
        ArchiveFormat::TarGz => extract_tar(&target, GzDecoder::new(file))?,
        ArchiveFormat::TarBz2 => extract_tar(&target, BzDecoder::new(file))?,
    };
    tracing::info!(
        "Extracted {} {suffix} file(s) from {:?} archive into {}",
        files.len(),
        format,
        destination.display()
    );
    Ok(ExtractOutcome { files })
}

pub fn sniff_format(file: &mut File) -> Result<ArchiveFormat> {
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).context("read archive header")?;
    file.seek(SeekFrom::Start(0)).context("rewind archive")?;
    match &magic[..read] {
        [b'P', b'K', 3, 4] | [b'P', b'K', 5, 6] => Ok(ArchiveFormat::Zip),
        [0x1f, 0x8b, ..] => Ok(ArchiveFormat::TarGz),
        [b'B', b'Z', b'h', ..] => Ok(ArchiveFormat::TarBz2),
        _ => Err(anyhow!("unrecognized archive format")),
    }
}

struct Target<'a> {
    destination: &'a Path,
    suffix: &'a str,
    layout: Layout,
}

impl Target<'_> {
    /// Where an entry lands, or `None` when it is filtered out.
    fn place(&self, entry_name: &str) -> Option<PathBuf> {
        if !entry_name.ends_with(self.suffix) {
            return None;
        }
        let path = Path::new(entry_name);
        match self.layout {
            Layout::Flatten => path.file_name().map(|name| self.destination.join(name)),
            Layout::Preserve => enclosed(path).map(|relative| self.destination.join(relative)),
        }
    }
}

fn enclosed(path: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

fn extract_zip(target: &Target<'_>, file: File) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(file).context("open zip archive")?;
    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("read zip entry")?;
        if entry.is_dir() {
            continue;
        }
        let Some(dest) = target.place(entry.name()) else {
            continue;
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create zip file parent")?;
        }
        let mut outfile =
            File::create(&dest).with_context(|| format!("create {}", dest.display()))?;
        io::copy(&mut entry, &mut outfile).context("write zip file")?;
        record(&mut written, dest);
    }
    Ok(written)
}

/// A flattened name seen twice is overwritten in place; report it once.
fn record(written: &mut Vec<PathBuf>, dest: PathBuf) {
    if !written.contains(&dest) {
        written.push(dest);
    }
}

fn extract_tar<R: Read>(target: &Target<'_>, reader: R) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(reader);
    let mut written = Vec::new();
    for entry in archive.entries().context("iterate tar entries")? {
        let mut entry = entry.context("read tar entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .context("read entry path")?
            .to_string_lossy()
            .into_owned();
        let Some(dest) = target.place(&name) else {
            continue;
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create entry parent")?;
        }
        entry
            .unpack(&dest)
            .with_context(|| format!("unpack {}", dest.display()))?;
        record(&mut written, dest);
    }
    Ok(written)
}

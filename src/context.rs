//! Build-context packaging.
//!
//! The image build endpoint takes a tar archive. A declared context
//! directory is packed into a gzipped tar in memory; a prebuilt archive
//! file is read verbatim.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::model::BuildContext;

/// Resolve a build context into the archive bytes streamed to the engine.
///
/// # Errors
///
/// Returns an IO error if the directory walk, archiving, or file read fails.
pub fn load_archive(context: &BuildContext) -> io::Result<Vec<u8>> {
    match context {
        BuildContext::Directory(dir) => pack_directory(dir),
        BuildContext::ArchiveFile(path) => {
            let mut bytes = Vec::new();
            File::open(path)?.read_to_end(&mut bytes)?;
            debug!("Read prebuilt context archive {:?} ({} bytes)", path, bytes.len());
            Ok(bytes)
        }
        BuildContext::Bytes(bytes) => Ok(bytes.clone()),
    }
}

/// Pack a context directory into a gzipped tar archive.
fn pack_directory(dir: &Path) -> io::Result<Vec<u8>> {
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("build context {:?} is not a directory", dir),
        ));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);
    builder.append_dir_all(".", dir)?;
    let bytes = builder.into_inner()?.finish()?;

    debug!("Packed context directory {:?} into {} bytes", dir, bytes.len());
    Ok(bytes)
}

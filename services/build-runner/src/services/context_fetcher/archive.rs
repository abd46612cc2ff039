use std::{io::Cursor, path::Path};

use flate2::read::GzDecoder;
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    Tar,
}

/// Sniffs the leading bytes; `None` for anything that is not tar or gzip.
pub fn detect(bytes: &[u8]) -> Option<ArchiveKind> {
    if bytes.starts_with(&GZIP_MAGIC) {
        return Some(ArchiveKind::Gzip);
    }

    let magic_end = USTAR_OFFSET + USTAR_MAGIC.len();
    if bytes.len() >= magic_end && &bytes[USTAR_OFFSET..magic_end] == USTAR_MAGIC {
        return Some(ArchiveKind::Tar);
    }

    None
}

/// Unpacks into `dest`, keeping directories and mode bits. Blocking.
pub fn extract(kind: ArchiveKind, bytes: &[u8], dest: &Path) -> std::io::Result<()> {
    match kind {
        ArchiveKind::Gzip => unpack(Archive::new(GzDecoder::new(Cursor::new(bytes))), dest),
        ArchiveKind::Tar => unpack(Archive::new(Cursor::new(bytes)), dest),
    }
}

fn unpack<R: std::io::Read>(mut archive: Archive<R>, dest: &Path) -> std::io::Result<()> {
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(dest)
}

//! Module image (`.ko`) access
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use memmap2::Mmap;

/// ELF section holding the NUL-separated `key=value` module info strings.
pub const MODINFO_SECTION: &str = ".modinfo";

/// On-disk compression of a module image, from its file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "gz" => Some(Compression::Gzip),
            "xz" => Some(Compression::Xz),
            "zst" => Some(Compression::Zstd),
            _ => None,
        }
    }

    fn decode(self, file: File) -> std::io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        match self {
            Compression::Gzip => {
                flate2::read::GzDecoder::new(file).read_to_end(&mut bytes)?;
            }
            Compression::Xz => {
                xz2::read::XzDecoder::new(file).read_to_end(&mut bytes)?;
            }
            Compression::Zstd => {
                zstd::stream::read::Decoder::new(file)?.read_to_end(&mut bytes)?;
            }
        }
        Ok(bytes)
    }
}

enum ImageData {
    /// Plain images are mapped; the file stays open for the mapping's lifetime.
    Mapped { _file: File, map: Mmap },
    Decoded(Vec<u8>),
}

/// A module image, mapped from disk or decompressed into memory
pub struct ModuleImage {
    path: PathBuf,
    data: ImageData,
}

impl ModuleImage {
    /// Open a module image, decompressing `.gz`, `.xz` and `.zst` files.
    pub fn open(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let data = match Compression::from_path(path) {
            Some(compression) => {
                let bytes = compression.decode(file).map_err(|e| {
                    format!("{}: cannot decompress {:?} image: {}", path.display(), compression, e)
                })?;
                ImageData::Decoded(bytes)
            }
            None => {
                let map = unsafe { Mmap::map(&file) }.map_err(|e| format!("{}: {}", path.display(), e))?;
                ImageData::Mapped { _file: file, map }
            }
        };
        Ok(ModuleImage {
            path: path.to_path_buf(),
            data,
        })
    }

    fn bytes(&self) -> &[u8] {
        match &self.data {
            ImageData::Mapped { map, .. } => &map[..],
            ImageData::Decoded(bytes) => &bytes[..],
        }
    }

    /// Raw info records from the `.modinfo` section, in section order.
    pub fn modinfo(&self) -> Result<Vec<(String, String)>, String> {
        let bytes = self.bytes();
        let elf = Elf::parse(bytes)
            .map_err(|e| format!("{}: not an ELF module image: {}", self.path.display(), e))?;

        let section = elf
            .section_headers
            .iter()
            .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(MODINFO_SECTION))
            .ok_or_else(|| format!("{}: no {} section", self.path.display(), MODINFO_SECTION))?;

        let payload = section
            .file_range()
            .and_then(|range| bytes.get(range))
            .ok_or_else(|| format!("{}: truncated {} section", self.path.display(), MODINFO_SECTION))?;

        Ok(parse_modinfo(payload))
    }
}

/// Split a `.modinfo` payload into `(key, value)` pairs.
///
/// Strings are NUL separated and padded with extra NULs; entries without an
/// `=` are ignored.
pub fn parse_modinfo(bytes: &[u8]) -> Vec<(String, String)> {
    let mut records = Vec::new();
    let mut start = 0;
    for end in memchr::memchr_iter(0, bytes).chain(std::iter::once(bytes.len())) {
        let entry = &bytes[start..end];
        start = end + 1;
        if entry.is_empty() {
            continue;
        }
        let entry = String::from_utf8_lossy(entry);
        if let Some((key, value)) = entry.split_once('=') {
            records.push((key.to_string(), value.to_string()));
        }
    }
    records
}

/// Module name for an image file: the file name without its `.ko*` suffix,
/// with dashes turned into underscores.
pub fn module_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_string_lossy();
    let stem = match file_name.find(".ko") {
        Some(pos) => &file_name[..pos],
        None => file_name.as_ref(),
    };
    if stem.is_empty() {
        return None;
    }
    Some(stem.replace('-', "_"))
}

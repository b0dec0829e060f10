//! Sidecar cache of canonical images.
//!
//! A cache file sits next to its source (`scan.dcm` → `scan.dcm.imgcache`)
//! and holds, little endian throughout:
//!
//! ```text
//! magic "GR16" | version u16 | width u32 | height u32
//! window center f32 | window width f32 | rescale slope f32 | rescale intercept f32
//! has orientation u8 | [6 x f32 direction cosines] | width * height x u16 pixels
//! ```
//!
//! The source file is never fingerprinted: a cache stays valid until it is
//! removed, even if its source changes.

use crate::{
    canonical::{CanonicalImage, Rescale},
    config::PipelineConfig,
    display::WindowLevel,
    error::{Error, Result, try_alloc},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

const MAGIC: [u8; 4] = *b"GR16";
const VERSION: u16 = 1;
const HEADER_LEN: u64 = 4 + 2 + 4 + 4 + 4 * 4 + 1;
const ORIENTATION_LEN: u64 = 6 * 4;
const PIXEL_CHUNK: usize = 16 * 1024;

/// Serialize `image` to the sidecar of `source`, replacing any previous one.
///
/// The file is written under a temporary name in the same directory and
/// renamed into place, so readers never see a partial cache.
pub fn write(
    source: impl AsRef<Path>,
    image: &CanonicalImage,
    config: &PipelineConfig,
) -> Result<PathBuf> {
    let path = config.cache_path(source);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = NamedTempFile::new_in(dir)?;
    let mut writer = BufWriter::new(temp);
    write_image(&mut writer, image)?;
    let temp = writer.into_inner().map_err(|e| e.into_error())?;
    temp.persist(&path).map_err(|e| e.error)?;

    debug!(path = %path.display(), "wrote image cache");
    Ok(path)
}

fn write_image<W: Write>(writer: &mut W, image: &CanonicalImage) -> io::Result<()> {
    let window = image.window();
    let rescale = image.rescale();

    writer.write_all(&MAGIC)?;
    writer.write_u16::<LittleEndian>(VERSION)?;
    writer.write_u32::<LittleEndian>(image.width())?;
    writer.write_u32::<LittleEndian>(image.height())?;
    writer.write_f32::<LittleEndian>(window.center)?;
    writer.write_f32::<LittleEndian>(window.width)?;
    writer.write_f32::<LittleEndian>(rescale.slope)?;
    writer.write_f32::<LittleEndian>(rescale.intercept)?;
    match image.orientation() {
        Some(cosines) => {
            writer.write_u8(1)?;
            for value in cosines {
                writer.write_f32::<LittleEndian>(value)?;
            }
        }
        None => writer.write_u8(0)?,
    }

    for chunk in image.pixels().chunks(PIXEL_CHUNK) {
        let little: Vec<u16> = chunk.iter().map(|p| p.to_le()).collect();
        writer.write_all(bytemuck::cast_slice(&little))?;
    }
    writer.flush()
}

/// Load the sidecar of `source`.
///
/// # Errors
///
/// [`Error::CacheMiss`] when there is no sidecar and [`Error::CorruptCache`]
/// when its header or payload length do not check out. Both mean the source
/// has to be decoded again.
pub fn read(source: impl AsRef<Path>, config: &PipelineConfig) -> Result<CanonicalImage> {
    let path = config.cache_path(source);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::CacheMiss(path)),
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let header = read_header(&mut reader)?;
    let header_len = if header.orientation.is_some() {
        HEADER_LEN + ORIENTATION_LEN
    } else {
        HEADER_LEN
    };
    let count = u64::from(header.width) * u64::from(header.height);
    let payload_len = file_len.saturating_sub(header_len);
    if payload_len != count * 2 {
        return Err(Error::CorruptCache(format!(
            "{payload_len} payload bytes for a {}x{} image",
            header.width, header.height
        )));
    }

    let count = usize::try_from(count)
        .map_err(|_| Error::CorruptCache(format!("{count} pixels")))?;
    let mut pixels = try_alloc::<u16>(count, config.max_pixel_bytes())?;
    reader
        .read_exact(bytemuck::cast_slice_mut(&mut pixels))
        .map_err(corrupt)?;
    pixels.iter_mut().for_each(|p| *p = u16::from_le(*p));

    let image = CanonicalImage::new(header.width, header.height, pixels)
        .map_err(|e| Error::CorruptCache(e.to_string()))?
        .with_rescale(header.rescale)
        .with_orientation(header.orientation)
        .with_window(header.window);

    debug!(path = %path.display(), "read image cache");
    Ok(image)
}

struct Header {
    width: u32,
    height: u32,
    window: WindowLevel,
    rescale: Rescale,
    orientation: Option<[f32; 6]>,
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(corrupt)?;
    if magic != MAGIC {
        return Err(Error::CorruptCache("bad magic".to_string()));
    }
    let version = reader.read_u16::<LittleEndian>().map_err(corrupt)?;
    if version != VERSION {
        return Err(Error::CorruptCache(format!("unknown version {version}")));
    }

    let width = reader.read_u32::<LittleEndian>().map_err(corrupt)?;
    let height = reader.read_u32::<LittleEndian>().map_err(corrupt)?;
    let center = reader.read_f32::<LittleEndian>().map_err(corrupt)?;
    let window_width = reader.read_f32::<LittleEndian>().map_err(corrupt)?;
    let slope = reader.read_f32::<LittleEndian>().map_err(corrupt)?;
    let intercept = reader.read_f32::<LittleEndian>().map_err(corrupt)?;

    let orientation = match reader.read_u8().map_err(corrupt)? {
        0 => None,
        1 => {
            let mut cosines = [0f32; 6];
            reader
                .read_f32_into::<LittleEndian>(&mut cosines)
                .map_err(corrupt)?;
            Some(cosines)
        }
        flag => {
            return Err(Error::CorruptCache(format!("orientation flag {flag}")));
        }
    };

    Ok(Header {
        width,
        height,
        window: WindowLevel::new(center, window_width),
        rescale: Rescale::new(slope, intercept),
        orientation,
    })
}

fn corrupt(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::CorruptCache("truncated".to_string())
    } else {
        Error::Io(err)
    }
}

/// Delete the sidecar of `source`. Returns whether there was one.
pub fn remove_cache(source: impl AsRef<Path>, config: &PipelineConfig) -> Result<bool> {
    match fs::remove_file(config.cache_path(source)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete every cache file in `dir` and return how many were removed.
pub fn clear_cache(dir: impl AsRef<Path>, config: &PipelineConfig) -> Result<usize> {
    let files = cache_files(dir.as_ref(), config)?;
    for file in &files {
        fs::remove_file(file)?;
    }
    debug!(dir = %dir.as_ref().display(), removed = files.len(), "cleared image cache");
    Ok(files.len())
}

pub fn count_cached(dir: impl AsRef<Path>, config: &PipelineConfig) -> Result<usize> {
    Ok(cache_files(dir.as_ref(), config)?.len())
}

fn cache_files(dir: &Path, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let is_cache = path
            .extension()
            .is_some_and(|ext| ext == config.cache_extension());
        if !hidden && is_cache {
            files.push(path);
        }
    }
    Ok(files)
}

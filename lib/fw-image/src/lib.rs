//! Firmware-file ingestion: ELF, Motorola S-Record, and raw binary
//! images, normalized into a sparse map of loadable segments keyed by
//! target physical address.

use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ELF parse error: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("not a big-endian 32-bit m68k ELF")]
    WrongElfFlavor,
    #[error("S-Record parse error: {0}")]
    Srec(String),
    #[error("S-Record file missing terminating S7 record")]
    SrecMissingTerminator,
    #[error("segments at {first:#x} and {second:#x} overlap")]
    Overlap { first: u32, second: u32 },
}

/// One contiguously-loaded chunk of a firmware image, at a known
/// physical address.
#[derive(Debug, Clone)]
pub struct Segment {
    pub data: Vec<u8>,
}

/// A firmware image as a sparse map of segments keyed by starting
/// physical address. Segments never overlap; gaps between them are
/// meaningful (unprogrammed flash, reserved regions) and are only
/// filled in by [`Image::into_contiguous`].
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub entry: Option<u32>,
    segments: BTreeMap<u32, Segment>,
}

impl Image {
    fn insert(&mut self, addr: u32, data: Vec<u8>) -> Result<(), Error> {
        let end = addr + data.len() as u32;
        if let Some((&prev_addr, prev)) = self.segments.range(..addr).next_back() {
            let prev_end = prev_addr + prev.data.len() as u32;
            if prev_end > addr {
                return Err(Error::Overlap { first: prev_addr, second: addr });
            }
        }
        if let Some((&next_addr, _)) = self.segments.range(addr..).next() {
            if next_addr < end {
                return Err(Error::Overlap { first: addr, second: next_addr });
            }
        }
        self.segments.insert(addr, Segment { data });
        Ok(())
    }

    /// Flattens the sparse segment map into one contiguous buffer
    /// covering `range`, filling any gap (including before the first
    /// segment or after the last) with `0xFF`.
    pub fn into_contiguous(&self, range: std::ops::Range<u32>) -> Vec<u8> {
        let mut out = vec![0xFFu8; (range.end - range.start) as usize];
        for (&addr, seg) in &self.segments {
            let seg_end = addr + seg.data.len() as u32;
            if seg_end <= range.start || addr >= range.end {
                continue;
            }
            let copy_start = addr.max(range.start);
            let copy_end = seg_end.min(range.end);
            let src_off = (copy_start - addr) as usize;
            let dst_off = (copy_start - range.start) as usize;
            let len = (copy_end - copy_start) as usize;
            out[dst_off..dst_off + len].copy_from_slice(&seg.data[src_off..src_off + len]);
        }
        out
    }

    pub fn segments(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.segments.iter().map(|(&addr, seg)| (addr, seg.data.as_slice()))
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|source| Error::Io { path: path.display().to_string(), source })
}

/// Loads an ELF image. Rejects anything that isn't a big-endian 32-bit
/// `EM_68K` file -- the teacher's `load_elf` makes the equivalent check
/// for little-endian ARM; the ColdFire target is always big-endian, so
/// the check inverts accordingly.
pub fn load_elf(path: &Path) -> Result<Image, Error> {
    use goblin::container::Container;
    use goblin::elf::header::EM_68K;
    use goblin::elf::program_header::PT_LOAD;

    let file_image = read_file(path)?;
    let elf = goblin::elf::Elf::parse(&file_image)?;

    if elf.header.container()? != Container::Big {
        return Err(Error::WrongElfFlavor);
    }
    if elf.header.e_machine != EM_68K {
        return Err(Error::WrongElfFlavor);
    }

    let mut image = Image::default();
    for phdr in &elf.program_headers {
        if phdr.p_type != PT_LOAD || phdr.p_filesz == 0 {
            continue;
        }
        let offset = phdr.p_offset as usize;
        let size = phdr.p_filesz as usize;
        let addr = phdr.p_paddr as u32;
        image.insert(addr, file_image[offset..offset + size].to_vec())?;
    }
    image.entry = Some(elf.header.e_entry as u32);
    Ok(image)
}

/// Loads a Motorola S-Record image. Data comes from S3 (32-bit address
/// data) records; the entry point comes from the terminating S7.
pub fn load_srecord(path: &Path) -> Result<Image, Error> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| Error::Io { path: path.display().to_string(), source })?;

    let mut image = Image::default();
    let mut entry = None;
    for record in srec::reader::read_records(&text) {
        let record = record.map_err(|e| Error::Srec(format!("{e:?}")))?;
        match record {
            srec::Record::S3(data) => {
                image.insert(data.address.0, data.data)?;
            }
            srec::Record::S7(srec::Address32(e)) => entry = Some(e),
            _ => {}
        }
    }
    image.entry = Some(entry.ok_or(Error::SrecMissingTerminator)?);
    Ok(image)
}

/// Loads a raw binary file verbatim at `base`. `base` has no meaning
/// beyond this call: raw input carries no entry point or relocation
/// information of its own.
pub fn load_raw(path: &Path, base: u32) -> Result<Image, Error> {
    let data = read_file(path)?;
    let mut image = Image::default();
    image.insert(base, data)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_contiguous_fills_gaps_with_ff() {
        let mut image = Image::default();
        image.insert(0x10, vec![0xAA, 0xBB]).unwrap();
        image.insert(0x20, vec![0xCC]).unwrap();
        let flat = image.into_contiguous(0x10..0x24);
        assert_eq!(flat.len(), 0x14);
        assert_eq!(flat[0], 0xAA);
        assert_eq!(flat[1], 0xBB);
        assert_eq!(flat[2], 0xFF);
        assert_eq!(flat[0x10], 0xCC);
        assert_eq!(flat[0x13], 0xFF);
    }

    #[test]
    fn insert_detects_overlap() {
        let mut image = Image::default();
        image.insert(0x100, vec![0; 16]).unwrap();
        let err = image.insert(0x108, vec![0; 4]).unwrap_err();
        assert!(matches!(err, Error::Overlap { .. }));
    }

    #[test]
    fn into_contiguous_clips_segment_spanning_range_edges() {
        let mut image = Image::default();
        image.insert(0x0, vec![1, 2, 3, 4, 5]).unwrap();
        let flat = image.into_contiguous(0x2..0x4);
        assert_eq!(flat, vec![3, 4]);
    }
}

use std::{fs, io, path::Path};

use log::{debug, info};
use thiserror::Error;

/// Size of the fixed GBS header that precedes the ROM image.
pub const HEADER_SIZE: usize = 0x70;
pub const BANK_SIZE: usize = 0x4000;
pub const MAX_BANKS: usize = 32;

const MAGIC: &[u8; 3] = b"GBS";
const SUPPORTED_VERSION: u8 = 1;

#[derive(Error, Debug)]
pub enum GbsError {
    #[error("file is {len} bytes, too short to hold a GBS header")]
    TooShort { len: usize },
    #[error("not a GBS file (bad magic)")]
    BadMagic,
    #[error("GBS version {0} is not supported, only version 1 is")]
    UnsupportedVersion(u8),
    #[error("the file has {count} tracks, index {track} is out of range")]
    TrackOutOfRange { track: usize, count: usize },
    #[error("ROM image needs more than {max} banks")]
    TooManyBanks { max: usize },
    #[error("failed to read GBS file: {0}")]
    Io(#[from] io::Error),
}

/// Fixed-layout metadata block at the start of a GBS file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GbsHeader {
    pub version: u8,
    pub song_count: u8,
    /// One-based index of the track to play first.
    pub start_song: u8,
    pub load_addr: u16,
    pub init_addr: u16,
    pub play_addr: u16,
    pub sp: u16,
    pub tma: u8,
    pub tac: u8,
    pub title: String,
    pub author: String,
    pub copyright: String,
}

impl GbsHeader {
    pub fn parse(data: &[u8]) -> Result<Self, GbsError> {
        if data.len() < HEADER_SIZE {
            return Err(GbsError::TooShort { len: data.len() });
        }
        if &data[0..3] != MAGIC {
            return Err(GbsError::BadMagic);
        }
        let version = data[0x03];
        if version != SUPPORTED_VERSION {
            return Err(GbsError::UnsupportedVersion(version));
        }

        let word = |off: usize| u16::from_le_bytes([data[off], data[off + 1]]);

        Ok(Self {
            version,
            song_count: data[0x04],
            start_song: data[0x05],
            load_addr: word(0x06),
            init_addr: word(0x08),
            play_addr: word(0x0A),
            sp: word(0x0C),
            tma: data[0x0E],
            tac: data[0x0F],
            title: fixed_string(&data[0x10..0x30]),
            author: fixed_string(&data[0x30..0x50]),
            copyright: fixed_string(&data[0x50..0x70]),
        })
    }

    /// Zero-based track index the file asks to start on.
    pub fn default_track(&self) -> usize {
        (self.start_song as usize).saturating_sub(1)
    }

    pub fn track_count(&self) -> usize {
        self.song_count as usize
    }

    pub fn check_track(&self, track: usize) -> Result<(), GbsError> {
        if track >= self.track_count() {
            return Err(GbsError::TrackOutOfRange {
                track,
                count: self.track_count(),
            });
        }
        Ok(())
    }
}

fn fixed_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    // Latin-1: every byte maps to the code point of the same value.
    raw[..end]
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}

pub type Bank = Box<[u8; BANK_SIZE]>;

/// A parsed GBS file: header plus the ROM image split into 16KB banks.
///
/// The image is placed at `load_addr`, so the first populated bank is
/// `load_addr / 0x4000` and starts `load_addr % 0x4000` bytes in.
#[derive(Debug, Clone)]
pub struct GbsFile {
    pub header: GbsHeader,
    banks: Vec<Option<Bank>>,
}

impl GbsFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GbsError> {
        let data = fs::read(&path)?;
        let file = Self::load(&data)?;
        info!(
            "Loaded GBS: \"{}\" by {} ({}), {} tracks",
            file.header.title,
            file.header.author,
            file.header.copyright,
            file.header.song_count
        );
        Ok(file)
    }

    pub fn load(data: &[u8]) -> Result<Self, GbsError> {
        let header = GbsHeader::parse(data)?;
        let rom = &data[HEADER_SIZE..];

        let mut banks: Vec<Option<Bank>> = vec![None; MAX_BANKS];
        let mut bank_no = header.load_addr as usize / BANK_SIZE;
        let mut offset = header.load_addr as usize % BANK_SIZE;
        let mut remaining = rom;

        loop {
            if bank_no >= MAX_BANKS {
                return Err(GbsError::TooManyBanks { max: MAX_BANKS });
            }
            let take = remaining.len().min(BANK_SIZE - offset);
            let mut page: Bank = Box::new([0; BANK_SIZE]);
            page[offset..offset + take].copy_from_slice(&remaining[..take]);
            debug!("Bank {bank_no}: {take} bytes");
            banks[bank_no] = Some(page);

            remaining = &remaining[take..];
            if remaining.is_empty() {
                break;
            }
            offset = 0;
            bank_no += 1;
        }

        Ok(Self { header, banks })
    }

    pub fn bank(&self, index: usize) -> Option<&[u8; BANK_SIZE]> {
        self.banks.get(index).and_then(|b| b.as_deref())
    }

    pub fn bank_count(&self) -> usize {
        self.banks.iter().filter(|b| b.is_some()).count()
    }

    /// Hand the banks to the memory image, which owns them from then on.
    pub(crate) fn banks(&self) -> &[Option<Bank>] {
        &self.banks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes() -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE];
        h[0..3].copy_from_slice(b"GBS");
        h[0x03] = 1;
        h[0x04] = 3;
        h[0x05] = 2;
        h[0x06..0x08].copy_from_slice(&0x0400u16.to_le_bytes());
        h[0x08..0x0A].copy_from_slice(&0x0410u16.to_le_bytes());
        h[0x0A..0x0C].copy_from_slice(&0x0420u16.to_le_bytes());
        h[0x0C..0x0E].copy_from_slice(&0xDFFFu16.to_le_bytes());
        h[0x10..0x15].copy_from_slice(b"Title");
        h[0x30..0x36].copy_from_slice(b"Author");
        h
    }

    #[test]
    fn parses_fields() {
        let h = GbsHeader::parse(&header_bytes()).unwrap();
        assert_eq!(h.song_count, 3);
        assert_eq!(h.default_track(), 1);
        assert_eq!(h.load_addr, 0x0400);
        assert_eq!(h.init_addr, 0x0410);
        assert_eq!(h.play_addr, 0x0420);
        assert_eq!(h.sp, 0xDFFF);
        assert_eq!(h.title, "Title");
        assert_eq!(h.author, "Author");
        assert_eq!(h.copyright, "");
    }

    #[test]
    fn start_song_zero_defaults_to_first_track() {
        let mut bytes = header_bytes();
        bytes[0x05] = 0;
        let h = GbsHeader::parse(&bytes).unwrap();
        assert_eq!(h.default_track(), 0);
    }

    #[test]
    fn image_split_across_banks() {
        let mut data = header_bytes();
        // 0x4000 - 0x400 bytes fill the rest of bank 0; 0x10 spill into bank 1.
        data.extend(std::iter::repeat_n(0xAA, BANK_SIZE - 0x400));
        data.extend(std::iter::repeat_n(0xBB, 0x10));
        let file = GbsFile::load(&data).unwrap();
        assert_eq!(file.bank_count(), 2);
        let b0 = file.bank(0).unwrap();
        assert_eq!(b0[0x3FF], 0);
        assert_eq!(b0[0x400], 0xAA);
        assert_eq!(b0[BANK_SIZE - 1], 0xAA);
        let b1 = file.bank(1).unwrap();
        assert_eq!(b1[0x0F], 0xBB);
        assert_eq!(b1[0x10], 0);
    }

    #[test]
    fn too_many_banks_rejected() {
        let mut data = header_bytes();
        data.extend(std::iter::repeat_n(0u8, BANK_SIZE * MAX_BANKS));
        assert!(matches!(
            GbsFile::load(&data),
            Err(GbsError::TooManyBanks { max: MAX_BANKS })
        ));
    }
}

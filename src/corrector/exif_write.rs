//! Embedded-date rewriting for JPEG files.
//!
//! When the file already carries an EXIF segment, the three datetime fields
//! are patched in place (they are fixed 20-byte ASCII values, so offsets
//! never move and every other field survives untouched). EXIF without the
//! datetime tags is extended: the TIFF bytes are kept verbatim and a new
//! IFD0 and Exif sub-IFD carrying the datetimes are appended, so foreign
//! fields like orientation and camera make survive. A file without EXIF
//! gets a minimal APP1 segment spliced in after the JFIF header. Failures
//! here are reported to the caller, which treats them as non-fatal: the
//! filesystem timestamp remains authoritative.

use anyhow::{bail, Context, Result};
use std::path::Path;

const TAG_DATETIME: u16 = 0x0132;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_DATETIME_ORIGINAL: u16 = 0x9003;
const TAG_DATETIME_DIGITIZED: u16 = 0x9004;

const TYPE_ASCII: u16 = 2;
const TYPE_LONG: u16 = 4;

/// EXIF datetime values are exactly `YYYY:MM:DD HH:MM:SS` plus a NUL.
const DATETIME_LEN: usize = 20;

/// Writes `datetime` (formatted `YYYY:MM:DD HH:MM:SS`) into the file's
/// DateTime, DateTimeOriginal and DateTimeDigitized fields. JPEG only.
pub fn write_exif_date(path: &Path, datetime: &str) -> Result<()> {
    if datetime.len() != DATETIME_LEN - 1 {
        bail!("Malformed EXIF datetime: {:?}", datetime);
    }
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false);
    if !is_jpeg {
        bail!("Embedded date rewrite supports JPEG only: {:?}", path);
    }

    let mut bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        bail!("Not a JPEG stream: {:?}", path);
    }

    match find_exif_segment(&bytes) {
        Some((tiff_start, tiff_end)) => {
            let patched = patch_tiff_dates(&mut bytes[tiff_start..tiff_end], datetime)?;
            if patched == 0 {
                // EXIF present but with no datetime fields to patch:
                // append datetime entries, keeping foreign fields. A TIFF
                // too broken to extend is replaced with a minimal one.
                let (seg_start, seg_end) = segment_bounds(&bytes, tiff_start);
                let segment = match extend_tiff_dates(&bytes[tiff_start..tiff_end], datetime) {
                    Ok(tiff) if tiff.len() + 8 <= u16::MAX as usize => wrap_app1(&tiff),
                    _ => build_app1(datetime),
                };
                bytes.splice(seg_start..seg_end, segment);
            }
        }
        None => {
            let at = insert_position(&bytes);
            bytes.splice(at..at, build_app1(datetime));
        }
    }

    std::fs::write(path, &bytes).with_context(|| format!("Failed to write {:?}", path))
}

/// Locates the TIFF payload of the first APP1 Exif segment, as a byte
/// range into the stream. None when the file carries no EXIF.
fn find_exif_segment(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        // Entropy-coded data follows SOS; no headers beyond this point.
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            return None;
        }
        let body = &bytes[pos + 4..pos + 2 + len];
        if marker == 0xE1 && body.len() > 6 && &body[..6] == b"Exif\0\0" {
            return Some((pos + 10, pos + 2 + len));
        }
        pos += 2 + len;
    }
    None
}

/// Full segment range (marker through payload) for the segment whose TIFF
/// payload starts at `tiff_start`.
fn segment_bounds(bytes: &[u8], tiff_start: usize) -> (usize, usize) {
    let seg_start = tiff_start - 10;
    let len = u16::from_be_bytes([bytes[seg_start + 2], bytes[seg_start + 3]]) as usize;
    (seg_start, seg_start + 2 + len)
}

/// New APP1 goes after an initial APP0 (JFIF) segment when one exists,
/// otherwise directly after SOI.
fn insert_position(bytes: &[u8]) -> usize {
    if bytes.len() >= 6 && bytes[2] == 0xFF && bytes[3] == 0xE0 {
        let len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        let end = 2 + 2 + len;
        if end <= bytes.len() {
            return end;
        }
    }
    2
}

struct TiffReader {
    little_endian: bool,
}

impl TiffReader {
    fn u16(&self, bytes: &[u8], at: usize) -> Option<u16> {
        let raw: [u8; 2] = bytes.get(at..at + 2)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    fn u32(&self, bytes: &[u8], at: usize) -> Option<u32> {
        let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn put_u16(&self, out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        });
    }

    fn put_u32(&self, out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        });
    }
}

/// One IFD entry, kept as raw bytes so carried-over entries survive
/// byte-for-byte with their value offsets intact.
struct RawEntry {
    tag: u16,
    kind: u16,
    raw: [u8; 12],
}

impl RawEntry {
    fn new(reader: &TiffReader, tag: u16, kind: u16, count: u32, value: u32) -> Self {
        let mut raw = Vec::with_capacity(12);
        reader.put_u16(&mut raw, tag);
        reader.put_u16(&mut raw, kind);
        reader.put_u32(&mut raw, count);
        reader.put_u32(&mut raw, value);
        Self {
            tag,
            kind,
            raw: raw.try_into().unwrap_or([0; 12]),
        }
    }

    fn value_u32(&self, reader: &TiffReader) -> Option<u32> {
        reader.u32(&self.raw, 8)
    }
}

fn read_ifd_entries(
    tiff: &[u8],
    reader: &TiffReader,
    ifd: usize,
) -> Result<(Vec<RawEntry>, u32)> {
    let count = reader.u16(tiff, ifd).context("Truncated IFD")? as usize;
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let at = ifd + 2 + i * 12;
        let raw: [u8; 12] = tiff
            .get(at..at + 12)
            .context("Truncated IFD entry")?
            .try_into()?;
        let (Some(tag), Some(kind)) = (reader.u16(&raw, 0), reader.u16(&raw, 2)) else {
            bail!("Truncated IFD entry");
        };
        entries.push(RawEntry { tag, kind, raw });
    }
    let next = reader
        .u32(tiff, ifd + 2 + count * 12)
        .context("Truncated IFD")?;
    Ok((entries, next))
}

fn write_ifd(out: &mut Vec<u8>, reader: &TiffReader, entries: &[RawEntry], next: u32) {
    reader.put_u16(out, entries.len() as u16);
    for entry in entries {
        out.extend_from_slice(&entry.raw);
    }
    reader.put_u32(out, next);
}

/// Overwrites every datetime field found in the TIFF structure with the
/// given value. Returns the number of fields patched.
fn patch_tiff_dates(tiff: &mut [u8], datetime: &str) -> Result<usize> {
    let reader = match tiff.get(..2) {
        Some(b"II") => TiffReader {
            little_endian: true,
        },
        Some(b"MM") => TiffReader {
            little_endian: false,
        },
        _ => bail!("Unrecognized TIFF byte order"),
    };
    if reader.u16(tiff, 2) != Some(42) {
        bail!("Bad TIFF magic");
    }

    let ifd0 = reader.u32(tiff, 4).context("Truncated TIFF header")? as usize;
    let mut patched = 0;
    let mut exif_ifd = None;

    patched += patch_ifd(tiff, &reader, ifd0, &[TAG_DATETIME], datetime, &mut exif_ifd);
    if let Some(offset) = exif_ifd {
        patched += patch_ifd(
            tiff,
            &reader,
            offset,
            &[TAG_DATETIME_ORIGINAL, TAG_DATETIME_DIGITIZED],
            datetime,
            &mut None,
        );
    }
    Ok(patched)
}

/// Walks one IFD, patching ASCII datetime entries whose tag is listed.
/// Records the Exif sub-IFD pointer when encountered.
fn patch_ifd(
    tiff: &mut [u8],
    reader: &TiffReader,
    ifd: usize,
    tags: &[u16],
    datetime: &str,
    exif_ifd: &mut Option<usize>,
) -> usize {
    let count = match reader.u16(tiff, ifd) {
        Some(c) => c as usize,
        None => return 0,
    };
    let mut patched = 0;
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        let (Some(tag), Some(kind), Some(value_count)) = (
            reader.u16(tiff, entry),
            reader.u16(tiff, entry + 2),
            reader.u32(tiff, entry + 4),
        ) else {
            break;
        };

        if tag == TAG_EXIF_IFD && kind == TYPE_LONG {
            if let Some(offset) = reader.u32(tiff, entry + 8) {
                *exif_ifd = Some(offset as usize);
            }
            continue;
        }

        if !tags.contains(&tag) || kind != TYPE_ASCII || value_count as usize != DATETIME_LEN {
            continue;
        }
        // A 20-byte ASCII value never fits inline, so the entry holds an
        // offset into the TIFF body.
        let Some(offset) = reader.u32(tiff, entry + 8).map(|o| o as usize) else {
            continue;
        };
        if let Some(slot) = tiff.get_mut(offset..offset + DATETIME_LEN - 1) {
            slot.copy_from_slice(datetime.as_bytes());
            patched += 1;
        }
    }
    patched
}

/// Rebuilds a TIFF whose datetime tags could not be patched in place.
/// The original bytes are kept verbatim, so every existing value offset
/// stays valid; a new IFD0 and Exif sub-IFD carrying the old entries plus
/// the datetime fields are appended and the header is repointed.
fn extend_tiff_dates(tiff: &[u8], datetime: &str) -> Result<Vec<u8>> {
    let reader = match tiff.get(..2) {
        Some(b"II") => TiffReader {
            little_endian: true,
        },
        Some(b"MM") => TiffReader {
            little_endian: false,
        },
        _ => bail!("Unrecognized TIFF byte order"),
    };
    let ifd0 = reader.u32(tiff, 4).context("Truncated TIFF header")? as usize;

    let (mut entries0, next0) = read_ifd_entries(tiff, &reader, ifd0)?;
    let old_exif = entries0
        .iter()
        .find(|e| e.tag == TAG_EXIF_IFD && e.kind == TYPE_LONG)
        .and_then(|e| e.value_u32(&reader));
    entries0.retain(|e| e.tag != TAG_DATETIME && e.tag != TAG_EXIF_IFD);

    let mut exif_entries = match old_exif {
        Some(offset) => read_ifd_entries(tiff, &reader, offset as usize)?.0,
        None => Vec::new(),
    };
    exif_entries.retain(|e| !matches!(e.tag, TAG_DATETIME_ORIGINAL | TAG_DATETIME_DIGITIZED));

    let mut out = tiff.to_vec();
    // Appended structures stay word-aligned.
    if out.len() % 2 == 1 {
        out.push(0);
    }

    let mut value = [0u8; DATETIME_LEN];
    value[..DATETIME_LEN - 1].copy_from_slice(datetime.as_bytes());
    let dt_value = out.len();
    out.extend_from_slice(&value);
    let dto_value = out.len();
    out.extend_from_slice(&value);
    let dtd_value = out.len();
    out.extend_from_slice(&value);

    let dims = DATETIME_LEN as u32;
    let exif_ifd = out.len();
    exif_entries.push(RawEntry::new(
        &reader,
        TAG_DATETIME_ORIGINAL,
        TYPE_ASCII,
        dims,
        dto_value as u32,
    ));
    exif_entries.push(RawEntry::new(
        &reader,
        TAG_DATETIME_DIGITIZED,
        TYPE_ASCII,
        dims,
        dtd_value as u32,
    ));
    // IFD entries are required to be tag-sorted.
    exif_entries.sort_by_key(|e| e.tag);
    write_ifd(&mut out, &reader, &exif_entries, 0);

    entries0.push(RawEntry::new(
        &reader,
        TAG_DATETIME,
        TYPE_ASCII,
        dims,
        dt_value as u32,
    ));
    entries0.push(RawEntry::new(
        &reader,
        TAG_EXIF_IFD,
        TYPE_LONG,
        1,
        exif_ifd as u32,
    ));
    entries0.sort_by_key(|e| e.tag);
    let new_ifd0 = out.len();
    write_ifd(&mut out, &reader, &entries0, next0);

    let header = if reader.little_endian {
        (new_ifd0 as u32).to_le_bytes()
    } else {
        (new_ifd0 as u32).to_be_bytes()
    };
    out[4..8].copy_from_slice(&header);
    Ok(out)
}

/// Builds a complete APP1 segment carrying a minimal little-endian TIFF:
/// IFD0 with DateTime and an Exif sub-IFD pointer, the sub-IFD with
/// DateTimeOriginal and DateTimeDigitized.
fn build_app1(datetime: &str) -> Vec<u8> {
    let mut value = [0u8; DATETIME_LEN];
    value[..DATETIME_LEN - 1].copy_from_slice(datetime.as_bytes());

    let mut tiff = Vec::with_capacity(128);
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());

    // Offsets within the TIFF body, laid out front to back.
    let ifd0 = 8usize;
    let dt_value = ifd0 + 2 + 2 * 12 + 4;
    let exif_ifd = dt_value + DATETIME_LEN;
    let dto_value = exif_ifd + 2 + 2 * 12 + 4;
    let dtd_value = dto_value + DATETIME_LEN;

    let entry = |tag: u16, kind: u16, count: u32, value: u32, out: &mut Vec<u8>| {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    };

    tiff.extend_from_slice(&2u16.to_le_bytes());
    entry(
        TAG_DATETIME,
        TYPE_ASCII,
        DATETIME_LEN as u32,
        dt_value as u32,
        &mut tiff,
    );
    entry(TAG_EXIF_IFD, TYPE_LONG, 1, exif_ifd as u32, &mut tiff);
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&value);

    tiff.extend_from_slice(&2u16.to_le_bytes());
    entry(
        TAG_DATETIME_ORIGINAL,
        TYPE_ASCII,
        DATETIME_LEN as u32,
        dto_value as u32,
        &mut tiff,
    );
    entry(
        TAG_DATETIME_DIGITIZED,
        TYPE_ASCII,
        DATETIME_LEN as u32,
        dtd_value as u32,
        &mut tiff,
    );
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&value);
    tiff.extend_from_slice(&value);
    debug_assert_eq!(tiff.len(), dtd_value + DATETIME_LEN);
    wrap_app1(&tiff)
}

/// Wraps a TIFF body in an APP1 Exif segment.
fn wrap_app1(tiff: &[u8]) -> Vec<u8> {
    let mut segment = Vec::with_capacity(tiff.len() + 10);
    segment.extend_from_slice(&[0xFF, 0xE1]);
    segment.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    segment.extend_from_slice(b"Exif\0\0");
    segment.extend_from_slice(tiff);
    segment
}

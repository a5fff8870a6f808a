use std::collections::BTreeMap;
use std::io::{Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression as BzCompression;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use log::{debug, info};
use snafu::ResultExt;
use tar::Header;

use crate::pdar::consts::{
    HEADER_CREATED_DATETIME, HEADER_HASH_TYPE, HEADER_VERSION, PDAR_FORMAT_MAJOR, PDAR_MAGIC,
    PDAR_VERSION,
};
use crate::pdar::digest::{DigestAlgorithm, HashEngine};
use crate::pdar::entry::Entry;
use crate::pdar::error::{
    IoArchiveSnafu, InvalidTimestampSnafu, MalformedTarSnafu, MissingArchiveHeaderSnafu,
    NotPdarSnafu, Result, UnsupportedVersionSnafu,
};
use crate::pdar::pax;

const MAGIC_LEN: usize = 8;

/// Archive-level metadata, carried on the first tar member's pax extended header.
#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    pub format_version: String,
    pub created: DateTime<Utc>,
    pub hash_algorithm: DigestAlgorithm,
}

/// A full plan, decoded from or ready to be encoded into the PDAR wire format.
#[derive(Debug, Clone)]
pub struct Archive {
    pub header: ArchiveHeader,
    pub entries: Vec<Entry>,
}

impl Archive {
    pub fn new(hash_algorithm: DigestAlgorithm, created: DateTime<Utc>, entries: Vec<Entry>) -> Self {
        Self {
            header: ArchiveHeader {
                format_version: PDAR_VERSION.to_string(),
                created,
                hash_algorithm,
            },
            entries,
        }
    }

    /// Serialises the archive: magic prefix, then the shorter of a gzip- or bzip2-compressed
    /// PAX tar of the plan.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        info!("Writing archive with {} entries", self.entries.len());
        let tar_bytes = self.build_tar()?;

        let gzipped = compress_gzip(&tar_bytes)?;
        let bzipped = compress_bzip2(&tar_bytes)?;

        writer
            .write_all(&magic_prefix())
            .context(IoArchiveSnafu)?;

        if gzipped.len() <= bzipped.len() {
            debug!("Using gzip compression ({} bytes)", gzipped.len());
            writer.write_all(&gzipped).context(IoArchiveSnafu)?;
        } else {
            debug!("Using bzip2 compression ({} bytes)", bzipped.len());
            writer.write_all(&bzipped).context(IoArchiveSnafu)?;
        }

        Ok(())
    }

    fn build_tar(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        let empty_digest = HashEngine::new(self.header.hash_algorithm).empty_digest();

        for (index, entry) in self.entries.iter().enumerate() {
            let mut records = entry.to_pax_records();
            if index == 0 {
                records.insert(HEADER_VERSION.to_string(), self.header.format_version.clone());
                records.insert(
                    HEADER_CREATED_DATETIME.to_string(),
                    format_timestamp(&self.header.created),
                );
                records.insert(
                    HEADER_HASH_TYPE.to_string(),
                    self.header.hash_algorithm.to_string(),
                );
            }

            let payload = entry.payload();
            // spec.md §4.3: "Member name: <target>/<orig_digest>".
            let member_name = format!(
                "{}/{}",
                entry.target().to_string_lossy(),
                entry.orig_digest(&empty_digest)
            );

            let mut header = Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(entry.mode().unwrap_or(0o644));
            header.set_cksum();

            pax::append_with_pax(&mut builder, &mut header, &member_name, &records, payload)
                .context(IoArchiveSnafu)?;
        }

        builder.into_inner().context(IoArchiveSnafu)
    }

    /// Parses a PDAR archive from a full reader. The whole archive is buffered and decompressed
    /// into memory; this format does not support streaming larger-than-memory archives.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).context(IoArchiveSnafu)?;

        if raw.len() < MAGIC_LEN || &raw[0..4] != PDAR_MAGIC.as_bytes() {
            return Err(NotPdarSnafu {
                path: std::path::PathBuf::from("<stream>"),
            }
            .build());
        }

        let version_digits =
            std::str::from_utf8(&raw[4..7]).map_err(|_| invalid_magic_version())?;
        let major: u32 = version_digits.parse().map_err(|_| invalid_magic_version())?;
        if raw[7] != 0 {
            return Err(invalid_magic_version());
        }
        if major > PDAR_FORMAT_MAJOR {
            return Err(UnsupportedVersionSnafu { version: major }.build());
        }

        let body = &raw[MAGIC_LEN..];
        let decompressed = decompress(body)?;

        let mut tar_archive = tar::Archive::new(decompressed.as_slice());
        let mut archive_header = None;
        let mut entries = Vec::new();

        for (index, raw_entry) in tar_archive.entries().context(IoArchiveSnafu)?.enumerate() {
            let mut raw_entry = raw_entry.context(IoArchiveSnafu)?;

            let mut records = BTreeMap::new();
            if let Some(extensions) = raw_entry.pax_extensions().context(IoArchiveSnafu)? {
                for ext in extensions {
                    let ext = ext.context(IoArchiveSnafu)?;
                    let key = ext.key().map_err(|_| malformed("non-utf8 pax key"))?;
                    let value = ext.value().map_err(|_| malformed("non-utf8 pax value"))?;
                    records.insert(key.to_string(), value.to_string());
                }
            }

            if index == 0 {
                archive_header = Some(parse_archive_header(&records)?);
            }

            let mode = raw_entry.header().mode().context(IoArchiveSnafu)?;
            let mut payload = Vec::new();
            raw_entry.read_to_end(&mut payload).context(IoArchiveSnafu)?;

            entries.push(Entry::from_pax_records(&records, mode, payload)?);
        }

        let header = archive_header.ok_or_else(|| {
            MissingArchiveHeaderSnafu {
                header: HEADER_VERSION.to_string(),
            }
            .build()
        })?;

        Ok(Archive { header, entries })
    }
}

fn parse_archive_header(records: &BTreeMap<String, String>) -> Result<ArchiveHeader> {
    let format_version = records
        .get(HEADER_VERSION)
        .ok_or_else(|| MissingArchiveHeaderSnafu { header: HEADER_VERSION.to_string() }.build())?
        .clone();
    let created_str = records.get(HEADER_CREATED_DATETIME).ok_or_else(|| {
        MissingArchiveHeaderSnafu {
            header: HEADER_CREATED_DATETIME.to_string(),
        }
        .build()
    })?;
    let hash_type = records.get(HEADER_HASH_TYPE).ok_or_else(|| {
        MissingArchiveHeaderSnafu {
            header: HEADER_HASH_TYPE.to_string(),
        }
        .build()
    })?;

    Ok(ArchiveHeader {
        format_version,
        created: parse_timestamp(created_str)?,
        hash_algorithm: DigestAlgorithm::parse(hash_type)?,
    })
}

fn magic_prefix() -> [u8; MAGIC_LEN] {
    let mut buf = [0u8; MAGIC_LEN];
    buf[0..4].copy_from_slice(PDAR_MAGIC.as_bytes());
    let digits = format!("{PDAR_FORMAT_MAJOR:03}");
    buf[4..7].copy_from_slice(digits.as_bytes());
    buf[7] = 0;
    buf
}

fn invalid_magic_version() -> crate::pdar::error::Error {
    UnsupportedVersionSnafu { version: 0 }.build()
}

fn malformed(details: &str) -> crate::pdar::error::Error {
    MalformedTarSnafu {
        details: details.to_string(),
    }
    .build()
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];
    for format in formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    Err(InvalidTimestampSnafu {
        value: value.to_string(),
    }
    .build())
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GzCompression::best());
    encoder.write_all(data).context(IoArchiveSnafu)?;
    encoder.finish().context(IoArchiveSnafu)
}

fn compress_bzip2(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new(), BzCompression::best());
    encoder.write_all(data).context(IoArchiveSnafu)?;
    encoder.finish().context(IoArchiveSnafu)
}

fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    if body.len() >= 2 && body[0] == 0x1f && body[1] == 0x8b {
        GzDecoder::new(body)
            .read_to_end(&mut out)
            .context(IoArchiveSnafu)?;
    } else if body.len() >= 3 && &body[0..3] == b"BZh" {
        BzDecoder::new(body)
            .read_to_end(&mut out)
            .context(IoArchiveSnafu)?;
    } else {
        return Err(malformed("unrecognised compression stream"));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdar::digest::HashEngine;

    fn sample_entries() -> Vec<Entry> {
        let hash = HashEngine::new(DigestAlgorithm::Sha1);
        vec![
            Entry::New {
                target: std::path::PathBuf::from("a.txt"),
                dest_digest: hash.hash_bytes(b"hello"),
                mode: 0o644,
                payload: b"hello".to_vec(),
            },
            Entry::Delete {
                target: std::path::PathBuf::from("b.txt"),
                orig_digest: hash.hash_bytes(b"bye"),
            },
        ]
    }

    #[test]
    fn round_trips_an_archive() {
        let created = DateTime::from_naive_utc_and_offset(
            NaiveDateTime::parse_from_str("2024-01-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap(),
            Utc,
        );
        let archive = Archive::new(DigestAlgorithm::Sha1, created, sample_entries());

        let mut buf = Vec::new();
        archive.write(&mut buf).unwrap();

        assert_eq!(&buf[0..4], b"PDAR");

        let decoded = Archive::read(buf.as_slice()).unwrap();
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.header.hash_algorithm, DigestAlgorithm::Sha1);
    }

    #[test]
    fn rejects_non_pdar_input() {
        let err = Archive::read(b"not a pdar archive at all".as_slice());
        assert!(err.is_err());
    }
}

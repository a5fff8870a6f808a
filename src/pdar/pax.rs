//! Minimal POSIX.1-2001 extended ("pax") tar header support.
//!
//! The `tar` crate can *read* pax extended headers (`Entry::pax_extensions`) but has no
//! higher-level call for *writing* custom keys, so the handful of lines needed to build one are
//! implemented directly here.

use std::collections::BTreeMap;
use std::io::{self, Write};

use tar::{Builder, Header};

/// Encodes one pax record: `"{len} {key}={value}\n"`, where `len` includes its own decimal
/// digits, the surrounding space, `=`, and the trailing newline.
fn encode_record(key: &str, value: &str) -> Vec<u8> {
    let suffix_len = 1 + key.len() + 1 + value.len() + 1; // ' ' key '=' value '\n'
    let mut len = suffix_len + digit_count(suffix_len);
    loop {
        let candidate_len = digit_count(len) + suffix_len;
        if candidate_len == len {
            break;
        }
        len = candidate_len;
    }

    format!("{len} {key}={value}\n").into_bytes()
}

fn digit_count(mut n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    let mut count = 0;
    while n > 0 {
        n /= 10;
        count += 1;
    }
    count
}

/// Builds the raw contents of a pax extended-header entry for a set of key/value pairs, in a
/// deterministic (sorted by key) order.
pub fn encode_records(records: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in records {
        out.extend_from_slice(&encode_record(key, value));
    }
    out
}

/// Appends a pax extended-header member immediately followed by the real member described by
/// `header`, carrying the extra metadata in `records`. `path` becomes the member's name; it is
/// written via `Builder::append_data` rather than `Header::set_path` so that names too long for
/// a ustar/gnu header (as `<target>/<orig_digest>` routinely is) are automatically carried as a
/// GNU long-name entry instead of failing outright.
pub fn append_with_pax<W: Write>(
    builder: &mut Builder<W>,
    header: &mut Header,
    path: &str,
    records: &BTreeMap<String, String>,
    data: &[u8],
) -> io::Result<()> {
    if !records.is_empty() {
        let body = encode_records(records);
        let mut pax_header = Header::new_ustar();
        pax_header.set_entry_type(tar::EntryType::XHeader);
        pax_header.set_size(body.len() as u64);
        pax_header.set_cksum();
        builder.append(&pax_header, body.as_slice())?;
    }

    builder.append_data(header, path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_length_is_self_referential() {
        let record = encode_record("pdar_version", "1.0.0");
        let text = String::from_utf8(record.clone()).unwrap();
        let (len_str, _) = text.split_once(' ').unwrap();
        let claimed: usize = len_str.parse().unwrap();
        assert_eq!(claimed, record.len());
    }

    #[test]
    fn encode_records_is_sorted_and_concatenated() {
        let mut records = BTreeMap::new();
        records.insert("pdar_hash_type".to_string(), "sha1".to_string());
        records.insert("pdar_version".to_string(), "1.0.0".to_string());

        let encoded = encode_records(&records);
        let text = String::from_utf8(encoded).unwrap();
        let hash_pos = text.find("pdar_hash_type").unwrap();
        let version_pos = text.find("pdar_version").unwrap();
        assert!(hash_pos < version_pos);
    }
}

//! `.KCL` keyboard-layout library index.
//!
//! A library is a sequence of records, each carrying a list of language
//! codes followed by a KL payload:
//!
//! ```text
//! offset 0: "KCF"            3-byte magic
//! offset 6: skip             first record begins at 7 + skip
//! record:   [len:u16][data_len:u8][ (lcnum:u16, code ',') · N ][KL body]
//! ```
//!
//! `len` counts from the record's language-code region; the next record
//! begins at `record + 3 + len`.  A record matches a requested id when
//! any of its codes equals it case-insensitively, or — for codes with a
//! non-zero `lcnum` — when `code ++ decimal(lcnum)` does.

use crate::format::reader::ByteReader;

const KCL_MAGIC: [u8; 3] = [0x4B, 0x43, 0x46];

/// Finds the record offset of `layout_id` inside a library image.
///
/// With `first_id_only` set, only the first code of each record is
/// tested.  Callers run two passes over their candidate libraries
/// (first-id pass, then full-alias pass) so an exact primary hit in a
/// later library beats an alias hit in an earlier one.
///
/// Corrupt or truncated libraries simply yield `None`.
pub fn locate(library: &[u8], layout_id: &str, first_id_only: bool) -> Option<usize> {
    let r = ByteReader::new(library);
    if r.slice(0, 3).ok()? != KCL_MAGIC {
        return None;
    }

    let mut dpos = 7usize + r.u8(6).ok()? as usize;
    loop {
        if dpos + 5 > r.len() {
            return None;
        }
        let record_start = dpos;
        let record_len = r.u16(dpos).ok()? as usize;
        let data_len = r.u8(dpos + 2).ok()? as usize;
        dpos += 5;

        let mut i = 0usize;
        while i < data_len {
            // Each entry leads with its numeric variant id.
            let lcnum = r.u16(dpos.wrapping_sub(2)).unwrap_or(0);
            i += 2;
            let mut code = String::new();
            while i < data_len {
                let byte = r.u8(dpos).ok()?;
                dpos += 1;
                i += 1;
                if byte == b',' {
                    break;
                }
                code.push(byte as char);
            }
            if code.eq_ignore_ascii_case(layout_id) {
                return Some(record_start);
            }
            if first_id_only {
                break;
            }
            if lcnum != 0 && format!("{code}{lcnum}").eq_ignore_ascii_case(layout_id) {
                return Some(record_start);
            }
            dpos += 2;
        }

        dpos = record_start + 3 + record_len;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a library of records, each `(codes, body)` where codes are
    /// `(lcnum, text)` pairs.
    fn build_library(records: &[(&[(u16, &str)], &[u8])]) -> Vec<u8> {
        let mut out = vec![0x4B, 0x43, 0x46, 0, 0, 0, 0];
        for (codes, body) in records {
            let mut data = Vec::new();
            for (lcnum, code) in codes.iter() {
                data.extend_from_slice(&lcnum.to_le_bytes());
                data.extend_from_slice(code.as_bytes());
                data.push(b',');
            }
            let record_len = (data.len() + body.len()) as u16;
            out.extend_from_slice(&record_len.to_le_bytes());
            out.push(data.len() as u8);
            out.extend_from_slice(&data);
            out.extend_from_slice(body);
        }
        out
    }

    #[test]
    fn test_locate_finds_record_by_primary_code() {
        let lib = build_library(&[
            (&[(0, "gr")], b"xxxx"),
            (&[(0, "fr")], b"yyyy"),
        ]);
        let first = locate(&lib, "gr", true).expect("gr present");
        let second = locate(&lib, "fr", true).expect("fr present");
        assert_eq!(first, 7);
        assert!(second > first, "records are located in file order");
    }

    #[test]
    fn test_locate_is_case_insensitive() {
        let lib = build_library(&[(&[(0, "Gr")], b"")]);
        assert!(locate(&lib, "GR", true).is_some());
        assert!(locate(&lib, "gr", true).is_some());
    }

    #[test]
    fn test_locate_matches_lcnum_alias() {
        // Code "gr" with variant 453 also answers to "gr453".
        let lib = build_library(&[(&[(453, "gr")], b"")]);
        assert!(locate(&lib, "gr453", false).is_some());
        assert_eq!(locate(&lib, "gr999", false), None);
    }

    #[test]
    fn test_first_id_only_skips_secondary_codes() {
        let lib = build_library(&[(&[(0, "gr"), (0, "de")], b"")]);
        assert_eq!(locate(&lib, "de", true), None);
        assert!(locate(&lib, "de", false).is_some());
    }

    #[test]
    fn test_first_id_only_skips_lcnum_aliases() {
        let lib = build_library(&[(&[(453, "gr")], b"")]);
        assert_eq!(locate(&lib, "gr453", true), None);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut lib = build_library(&[(&[(0, "gr")], b"")]);
        lib[0] = b'X';
        assert_eq!(locate(&lib, "gr", true), None);
    }

    #[test]
    fn test_truncated_library_yields_none() {
        let lib = build_library(&[(&[(0, "gr")], b"body")]);
        for cut in 0..lib.len().min(8) {
            assert_eq!(locate(&lib[..cut], "zz", true), None);
        }
    }

    #[test]
    fn test_unknown_id_yields_none() {
        let lib = build_library(&[(&[(0, "gr")], b""), (&[(0, "fr")], b"")]);
        assert_eq!(locate(&lib, "it", false), None);
    }

    #[test]
    fn test_skip_byte_offsets_the_first_record() {
        let mut lib = vec![0x4B, 0x43, 0x46, 0, 0, 0, 2, 0xAA, 0xBB];
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(b"gr,");
        let record_len = data.len() as u16;
        lib.extend_from_slice(&record_len.to_le_bytes());
        lib.push(data.len() as u8);
        lib.extend_from_slice(&data);
        assert_eq!(locate(&lib, "gr", true), Some(9));
    }
}

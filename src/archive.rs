//! Reads a System V `ar` archive and hands every member that looks like a
//! relocatable object to the object parser.
//!
//! Grounded on the `ar` header layout used by `object::archive::Header`
//! (gimli-rs-object): an 8-byte `!<arch>\n` magic followed by repeating
//! 60-byte member headers (16 name + 12 date + 6 uid + 6 gid + 8 mode + 10
//! decimal size + 2 terminator) and `size` bytes of payload, aligned to 2
//! bytes.

use crate::error::{Error, Result};
use crate::module::Module;
use crate::object::parse_object;

const MAGIC: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;
const NAME_LEN: usize = 16;
const SIZE_OFFSET: usize = 16 + 12 + 6 + 6 + 8;
const SIZE_LEN: usize = 10;

/// Parse an archive's raw bytes into zero or more [`Module`]s. Members whose
/// payload doesn't start with the object format's `XL2` magic are skipped
/// (logged, not fatal).
pub fn parse_archive(filename: &str, data: &[u8]) -> Result<Vec<Module>> {
    if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
        return Err(Error::format(format!(
            "{filename} does not start with the archive magic"
        )));
    }

    let mut modules = Vec::new();
    let mut offset = MAGIC.len();

    while offset < data.len() {
        if offset + HEADER_LEN > data.len() {
            return Err(Error::format(format!(
                "{filename} is truncated inside an archive member header"
            )));
        }
        let header = &data[offset..offset + HEADER_LEN];
        offset += HEADER_LEN;

        let name = String::from_utf8_lossy(&header[..NAME_LEN])
            .trim_end()
            .to_string();
        let size_field = std::str::from_utf8(&header[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN])
            .map_err(|_| Error::format(format!("{filename} has a non-UTF8 member size field")))?;
        let size: usize = size_field.trim().parse().map_err(|_| {
            Error::format(format!(
                "{filename} member `{name}` has a malformed size field"
            ))
        })?;

        if offset + size > data.len() {
            return Err(Error::format(format!(
                "{filename} terminates before reading full member `{name}`"
            )));
        }
        let payload = &data[offset..offset + size];
        offset += size;
        if size % 2 == 1 {
            // Align to 2 bytes.
            offset += 1;
        }

        if payload.len() > 3 && &payload[..3] == b"XL2" {
            let text = String::from_utf8_lossy(payload).into_owned();
            modules.push(parse_object(&name, text)?);
        } else {
            log::info!("{filename}: member `{name}` is not a relocatable object file");
        }
    }

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(name: &str, size: usize) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        let mut name_field = name.as_bytes().to_vec();
        name_field.resize(NAME_LEN, b' ');
        header.extend_from_slice(&name_field);
        header.extend_from_slice(&[b' '; 12]); // date
        header.extend_from_slice(&[b' '; 6]); // uid
        header.extend_from_slice(&[b' '; 6]); // gid
        header.extend_from_slice(&[b' '; 8]); // mode
        let size_str = format!("{size:<10}");
        header.extend_from_slice(size_str.as_bytes());
        header.extend_from_slice(b"`\n");
        assert_eq!(header.len(), HEADER_LEN);
        header
    }

    fn build_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        for (name, payload) in members {
            data.extend_from_slice(&pad(name, payload.len()));
            data.extend_from_slice(payload);
            if payload.len() % 2 == 1 {
                data.push(b'\n');
            }
        }
        data
    }

    #[test]
    fn skips_non_object_members() {
        let obj = b"XL2\nA _HEADER0 size 0001 flags 8 addr 4000\nM puts\n";
        let junk = b"not an object";
        let data = build_archive(&[("puts.rel/", obj.as_slice()), ("readme", junk.as_slice())]);
        let modules = parse_archive("lib.lib", &data).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "puts");
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(parse_archive("lib.lib", b"not an archive!!").is_err());
    }
}

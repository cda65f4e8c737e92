//! String-descriptor table with optional hardware-serial synthesis.
//!
//! Indices follow the device-descriptor convention used throughout the stack:
//! 0 is the language-ID table, 1 the manufacturer, 2 the product, 3 the
//! serial number. When a hardware unique ID is supplied, index 3 is
//! synthesized at request time as `prefix` followed by two lowercase hex
//! characters per ID byte.

use core::cell::Cell;

use crate::descriptors::{
    put_u16, Descriptor, DescriptorType, LanguagesDescriptor, StringDescriptor,
};
use crate::errorcode::ErrorCode;

/// Generation buffer size. String descriptors carry a one-byte length field,
/// so 255 covers every legal descriptor.
pub const STRING_BUFLEN: usize = 255;

/// Language packs are gathered into a stack-side LANGID array when the table
/// descriptor is built, so the table has a fixed upper bound.
pub const MAX_LANGUAGES: usize = 4;

pub const MANUFACTURER_STRING: u8 = 1;
pub const PRODUCT_STRING: u8 = 2;
pub const SERIAL_STRING: u8 = 3;

/// The strings one language contributes.
pub struct LanguagePack<'a> {
    /// USB LANGID, e.g. 0x0409 for US English.
    pub lang_id: u16,
    pub manufacturer: &'a str,
    pub product: &'a str,
    /// Used only when no hardware unique ID was supplied.
    pub serial: &'a str,
}

pub struct DescriptorStrings<'a> {
    packs: &'a [LanguagePack<'a>],
    /// Hardware unique-ID bytes; replaces every language's serial string.
    unique_id: Option<&'a [u8]>,
    serial_prefix: &'a str,
    buffer: [Cell<u8>; STRING_BUFLEN],
}

impl<'a> DescriptorStrings<'a> {
    pub fn new(
        packs: &'a [LanguagePack<'a>],
        unique_id: Option<&'a [u8]>,
        serial_prefix: &'a str,
    ) -> Self {
        assert!(!packs.is_empty(), "at least one language pack is required");
        assert!(packs.len() <= MAX_LANGUAGES, "too many language packs");
        if let Some(id) = unique_id {
            // prefix + 2 hex chars per byte, 2 bytes per UTF-16 unit, 2-byte
            // header; must fit the generation buffer.
            let units = serial_prefix.chars().count() + 2 * id.len();
            assert!(2 + 2 * units <= STRING_BUFLEN, "unique ID too long");
        }
        DescriptorStrings {
            packs,
            unique_id,
            serial_prefix,
            buffer: [0u8; STRING_BUFLEN].map(Cell::new),
        }
    }

    /// The generation buffer the engine copies descriptors out of.
    pub fn buffer(&self) -> &[Cell<u8>] {
        &self.buffer
    }

    /// Build the index-0 language-ID descriptor into the buffer and return
    /// its length.
    pub fn lang_id_data(&self) -> usize {
        let mut langs = [0u16; MAX_LANGUAGES];
        for (slot, pack) in langs.iter_mut().zip(self.packs) {
            *slot = pack.lang_id;
        }
        LanguagesDescriptor {
            langs: &langs[..self.packs.len()],
        }
        .write_to(&self.buffer)
    }

    /// Build string descriptor `index` for `lang_id` into the buffer and
    /// return its length. Index 0 is served by `lang_id_data` and rejected
    /// here, as are unknown indices and unregistered languages.
    pub fn generate_string(&self, index: u8, lang_id: u16) -> Result<usize, ErrorCode> {
        let pack = self
            .packs
            .iter()
            .find(|p| p.lang_id == lang_id)
            .ok_or(ErrorCode::NoDevice)?;

        let string = match index {
            MANUFACTURER_STRING => pack.manufacturer,
            PRODUCT_STRING => pack.product,
            SERIAL_STRING => match self.unique_id {
                Some(id) => return Ok(self.generate_serial(id)),
                None => pack.serial,
            },
            _ => return Err(ErrorCode::NoDevice),
        };

        Ok(StringDescriptor { string }.write_to(&self.buffer))
    }

    /// Serial synthesized from the hardware unique ID: the configured prefix
    /// followed by the ID bytes in hex, all as UTF-16LE code units.
    fn generate_serial(&self, id: &[u8]) -> usize {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        self.buffer[1].set(DescriptorType::String as u8);
        let mut i = 2;
        for ch in self.serial_prefix.chars().filter(|ch| ch.len_utf16() == 1) {
            put_u16(&self.buffer[i..i + 2], ch as u16);
            i += 2;
        }
        for byte in id {
            put_u16(&self.buffer[i..i + 2], HEX[(byte >> 4) as usize] as u16);
            put_u16(&self.buffer[i + 2..i + 4], HEX[(byte & 0xf) as usize] as u16);
            i += 4;
        }
        self.buffer[0].set(i as u8);
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGLISH: LanguagePack<'static> = LanguagePack {
        lang_id: 0x0409,
        manufacturer: "Example Corp",
        product: "Widget",
        serial: "0000",
    };

    fn utf16_of(buf: &[Cell<u8>]) -> String {
        let len = buf[0].get() as usize;
        let units: Vec<u16> = buf[2..len]
            .chunks(2)
            .map(|c| u16::from_le_bytes([c[0].get(), c[1].get()]))
            .collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn lang_id_table() {
        let strings = DescriptorStrings::new(&[ENGLISH], None, "");
        let len = strings.lang_id_data();
        assert_eq!(len, 4);
        assert_eq!(strings.buffer()[0].get(), 4);
        assert_eq!(strings.buffer()[1].get(), 3);
        assert_eq!(strings.buffer()[2].get(), 0x09);
        assert_eq!(strings.buffer()[3].get(), 0x04);
    }

    #[test]
    fn manufacturer_string() {
        let strings = DescriptorStrings::new(&[ENGLISH], None, "");
        let len = strings.generate_string(MANUFACTURER_STRING, 0x0409).unwrap();
        assert_eq!(len, 2 + 2 * "Example Corp".len());
        assert_eq!(utf16_of(strings.buffer()), "Example Corp");
    }

    #[test]
    fn unknown_language_is_not_found() {
        let strings = DescriptorStrings::new(&[ENGLISH], None, "");
        assert_eq!(
            strings.generate_string(PRODUCT_STRING, 0x0407),
            Err(ErrorCode::NoDevice)
        );
    }

    #[test]
    fn unknown_index_is_not_found() {
        let strings = DescriptorStrings::new(&[ENGLISH], None, "");
        assert_eq!(strings.generate_string(7, 0x0409), Err(ErrorCode::NoDevice));
    }

    #[test]
    fn serial_from_unique_id() {
        let id = [0xde, 0xad, 0x00, 0x5a];
        let strings = DescriptorStrings::new(&[ENGLISH], Some(&id), "SN-");
        let len = strings.generate_string(SERIAL_STRING, 0x0409).unwrap();
        assert_eq!(len, 2 + 2 * (3 + 8));
        assert_eq!(utf16_of(strings.buffer()), "SN-dead005a");
    }

    #[test]
    fn serial_without_unique_id_uses_pack() {
        let strings = DescriptorStrings::new(&[ENGLISH], None, "");
        strings.generate_string(SERIAL_STRING, 0x0409).unwrap();
        assert_eq!(utf16_of(strings.buffer()), "0000");
    }
}

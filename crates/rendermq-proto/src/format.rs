use crate::ProtoError;

/// Bitmask of requested/available tile formats. Mirrors the original
/// `protoFmt` enum: each variant is a distinct power-of-two bit so several
/// formats can be requested (and OR-ed together during coalescing) at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct Format(u8);

impl Format {
    pub const NONE: Format = Format(0);
    pub const PNG: Format = Format(1);
    pub const JPEG: Format = Format(2);
    pub const JSON: Format = Format(4);
    pub const GIF: Format = Format(8);
    pub const ALL: Format = Format(0b1111);

    pub fn from_bits(bits: u8) -> Format {
        Format(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Format) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Format) -> Format {
        Format(self.0 | other.0)
    }

    /// Iterates the individual single-bit formats set in this mask, in a
    /// fixed canonical order (PNG, JPEG, JSON, GIF).
    pub fn iter(self) -> impl Iterator<Item = Format> {
        [Format::PNG, Format::JPEG, Format::JSON, Format::GIF]
            .into_iter()
            .filter(move |f| self.contains(*f))
    }

    pub fn mime_type(self) -> Result<&'static str, ProtoError> {
        match self {
            Format::PNG => Ok("image/png"),
            Format::JPEG => Ok("image/jpeg"),
            Format::GIF => Ok("image/gif"),
            Format::JSON => Ok("application/json"),
            _ => Err(ProtoError::UnknownFormat(self.0)),
        }
    }

    pub fn extension(self) -> Result<&'static str, ProtoError> {
        match self {
            Format::PNG => Ok("png"),
            Format::JPEG => Ok("jpg"),
            Format::GIF => Ok("gif"),
            Format::JSON => Ok("json"),
            _ => Err(ProtoError::UnknownFormat(self.0)),
        }
    }

    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Format::PNG),
            "jpg" | "jpeg" => Some(Format::JPEG),
            "gif" => Some(Format::GIF),
            "json" => Some(Format::JSON),
            _ => None,
        }
    }
}

impl std::ops::BitOr for Format {
    type Output = Format;
    fn bitor(self, rhs: Format) -> Format {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for Format {
    fn bitor_assign(&mut self, rhs: Format) {
        *self = self.union(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_contains() {
        let mask = Format::PNG | Format::GIF;
        assert!(mask.contains(Format::PNG));
        assert!(mask.contains(Format::GIF));
        assert!(!mask.contains(Format::JPEG));
    }

    #[test]
    fn iter_order_is_canonical() {
        let mask = Format::GIF | Format::PNG | Format::JSON;
        let order: Vec<_> = mask.iter().collect();
        assert_eq!(order, vec![Format::PNG, Format::JSON, Format::GIF]);
    }

    #[test]
    fn single_bit_formats_roundtrip_extension() {
        for fmt in [Format::PNG, Format::JPEG, Format::GIF, Format::JSON] {
            let ext = fmt.extension().unwrap();
            assert_eq!(Format::from_extension(ext).unwrap(), fmt);
        }
    }
}

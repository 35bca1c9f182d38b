#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("buffer too short to contain a tagged field")]
    TruncatedField,
    #[error("unknown job command tag {0}")]
    UnknownCommand(u8),
    #[error("unknown format bit {0}")]
    UnknownFormat(u8),
    #[error("style string was not valid UTF-8")]
    InvalidStyle(#[source] std::string::FromUtf8Error),
    #[error("metatile magic bytes did not match \"META\"")]
    CorruptMetatile,
    #[error("requested format is not present in this metatile")]
    FormatMissing,
    #[error("metatile entry offset+size exceeds buffer length")]
    TruncatedMetatile,
    #[error("requested sub-tile ({x}, {y}) is outside the metatile")]
    TileOutOfRange { x: i32, y: i32 },
}

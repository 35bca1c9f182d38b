//! Tagged-field binary encoding of a [`Job`], in the spirit of a
//! Protocol-Buffers wire format but hand-rolled: each field is a one-byte
//! tag followed by its value, integers in network byte order and strings
//! length-prefixed UTF-8. Optional fields (`last_modified`,
//! `request_last_modified`) are simply omitted when zero.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{Cursor, Read, Write};

use crate::{Format, Job, ProtoError, Status};

const TAG_COMMAND: u8 = 1;
const TAG_X: u8 = 2;
const TAG_Y: u8 = 3;
const TAG_Z: u8 = 4;
const TAG_ID: u8 = 5;
const TAG_STYLE: u8 = 6;
const TAG_FORMAT: u8 = 7;
const TAG_IMAGE: u8 = 8;
const TAG_LAST_MODIFIED: u8 = 9;
const TAG_REQUEST_LAST_MODIFIED: u8 = 10;

fn command_tag(status: Status) -> u8 {
    match status {
        Status::Ignore => 0,
        Status::Render => 1,
        Status::Dirty => 2,
        Status::Done => 3,
        Status::NotDone => 4,
        Status::RenderPrio => 5,
        Status::RenderBulk => 6,
        Status::Status => 7,
    }
}

fn command_from_tag(tag: u8) -> Result<Status, ProtoError> {
    match tag {
        0 => Ok(Status::Ignore),
        1 => Ok(Status::Render),
        2 => Ok(Status::Dirty),
        3 => Ok(Status::Done),
        4 => Ok(Status::NotDone),
        5 => Ok(Status::RenderPrio),
        6 => Ok(Status::RenderBulk),
        7 => Ok(Status::Status),
        other => Err(ProtoError::UnknownCommand(other)),
    }
}

/// Encodes a [`Job`] into the tagged-field wire format.
pub fn encode_job(job: &Job) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.write_u8(TAG_COMMAND).unwrap();
    buf.write_u8(command_tag(job.status)).unwrap();

    buf.write_u8(TAG_X).unwrap();
    buf.write_i32::<BE>(job.x).unwrap();

    buf.write_u8(TAG_Y).unwrap();
    buf.write_i32::<BE>(job.y).unwrap();

    buf.write_u8(TAG_Z).unwrap();
    buf.write_i32::<BE>(job.z).unwrap();

    buf.write_u8(TAG_ID).unwrap();
    buf.write_i64::<BE>(job.client_id).unwrap();

    write_string(&mut buf, TAG_STYLE, &job.style);

    buf.write_u8(TAG_FORMAT).unwrap();
    buf.write_u8(job.format.bits()).unwrap();

    if let Some(payload) = &job.payload {
        write_bytes(&mut buf, TAG_IMAGE, payload);
    }
    if job.last_modified != 0 {
        buf.write_u8(TAG_LAST_MODIFIED).unwrap();
        buf.write_i64::<BE>(job.last_modified).unwrap();
    }
    if job.request_last_modified != 0 {
        buf.write_u8(TAG_REQUEST_LAST_MODIFIED).unwrap();
        buf.write_i64::<BE>(job.request_last_modified).unwrap();
    }

    buf
}

fn write_string(buf: &mut Vec<u8>, tag: u8, s: &str) {
    write_bytes(buf, tag, s.as_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, tag: u8, bytes: &[u8]) {
    buf.write_u8(tag).unwrap();
    buf.write_u32::<BE>(bytes.len() as u32).unwrap();
    buf.write_all(bytes).unwrap();
}

/// Decodes a [`Job`] previously written by [`encode_job`].
pub fn decode_job(bytes: &[u8]) -> Result<Job, ProtoError> {
    let mut cur = Cursor::new(bytes);

    let mut status = Status::Ignore;
    let mut x = 0;
    let mut y = 0;
    let mut z = 0;
    let mut client_id = 0;
    let mut style = String::new();
    let mut format = Format::NONE;
    let mut payload = None;
    let mut last_modified = 0;
    let mut request_last_modified = 0;

    loop {
        let tag = match cur.read_u8() {
            Ok(tag) => tag,
            Err(_) => break,
        };
        match tag {
            TAG_COMMAND => status = command_from_tag(read_u8(&mut cur)?)?,
            TAG_X => x = read_i32(&mut cur)?,
            TAG_Y => y = read_i32(&mut cur)?,
            TAG_Z => z = read_i32(&mut cur)?,
            TAG_ID => client_id = read_i64(&mut cur)?,
            TAG_STYLE => {
                let bytes = read_len_prefixed(&mut cur)?;
                style = String::from_utf8(bytes).map_err(ProtoError::InvalidStyle)?;
            }
            TAG_FORMAT => format = Format::from_bits(read_u8(&mut cur)?),
            TAG_IMAGE => payload = Some(read_len_prefixed(&mut cur)?),
            TAG_LAST_MODIFIED => last_modified = read_i64(&mut cur)?,
            TAG_REQUEST_LAST_MODIFIED => request_last_modified = read_i64(&mut cur)?,
            _ => return Err(ProtoError::TruncatedField),
        }
    }

    Ok(Job {
        status,
        x,
        y,
        z,
        client_id,
        style,
        format,
        last_modified,
        request_last_modified,
        payload,
    })
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, ProtoError> {
    cur.read_u8().map_err(|_| ProtoError::TruncatedField)
}
fn read_i32(cur: &mut Cursor<&[u8]>) -> Result<i32, ProtoError> {
    cur.read_i32::<BE>().map_err(|_| ProtoError::TruncatedField)
}
fn read_i64(cur: &mut Cursor<&[u8]>) -> Result<i64, ProtoError> {
    cur.read_i64::<BE>().map_err(|_| ProtoError::TruncatedField)
}
fn read_len_prefixed(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>, ProtoError> {
    let len = cur
        .read_u32::<BE>()
        .map_err(|_| ProtoError::TruncatedField)? as usize;
    let mut bytes = vec![0u8; len];
    cur.read_exact(&mut bytes)
        .map_err(|_| ProtoError::TruncatedField)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_roundtrips_through_wire_format() {
        let mut job = Job::new(Status::RenderPrio, 5, 9, 4, 42, "vy/map", Format::PNG | Format::JSON);
        job.payload = Some(vec![1, 2, 3, 4]);
        job.last_modified = 1_700_000_000;

        let bytes = encode_job(&job);
        let decoded = decode_job(&bytes).unwrap();

        assert_eq!(decoded.status, Status::RenderPrio);
        assert_eq!(decoded.x, 5);
        assert_eq!(decoded.y, 9);
        assert_eq!(decoded.z, 4);
        assert_eq!(decoded.client_id, 42);
        assert_eq!(decoded.style, "vy/map");
        assert_eq!(decoded.format, Format::PNG | Format::JSON);
        assert_eq!(decoded.payload, Some(vec![1, 2, 3, 4]));
        assert_eq!(decoded.last_modified, 1_700_000_000);
        assert_eq!(decoded.request_last_modified, 0);
    }

    #[test]
    fn unknown_command_tag_is_rejected() {
        let mut buf = Vec::new();
        buf.push(TAG_COMMAND);
        buf.push(99);
        assert!(matches!(decode_job(&buf), Err(ProtoError::UnknownCommand(99))));
    }
}

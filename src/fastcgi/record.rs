//! FastCGI record payloads
//!
//! A record is a logically complete message. Stream records (params, stdin, stdout, ...) may be
//! split across several packets on the wire; [`Connection`](super::Connection) stitches them
//! back together before a payload gets here.
use crate::error::Error;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};

pub(crate) type Pairs = BTreeMap<String, String>;

pub(crate) const FCGI_BEGIN_REQUEST: u8 = 1;
pub(crate) const FCGI_ABORT_REQUEST: u8 = 2;
pub(crate) const FCGI_END_REQUEST: u8 = 3;
pub(crate) const FCGI_PARAMS: u8 = 4;
pub(crate) const FCGI_STDIN: u8 = 5;
pub(crate) const FCGI_STDOUT: u8 = 6;
pub(crate) const FCGI_STDERR: u8 = 7;
pub(crate) const FCGI_DATA: u8 = 8;
pub(crate) const FCGI_GET_VALUES: u8 = 9;
pub(crate) const FCGI_GET_VALUES_RESULT: u8 = 10;
pub(crate) const FCGI_UNKNOWN_TYPE: u8 = 11;

const MANAGEMENT_RECORD_TYPES: [u8; 3] =
    [FCGI_GET_VALUES, FCGI_GET_VALUES_RESULT, FCGI_UNKNOWN_TYPE];

const DISCRETE_RECORD_TYPES: [u8; 6] = [
    FCGI_GET_VALUES,
    FCGI_GET_VALUES_RESULT,
    FCGI_UNKNOWN_TYPE,
    FCGI_BEGIN_REQUEST,
    FCGI_ABORT_REQUEST,
    FCGI_END_REQUEST,
];

const ROLE_RESPONDER: u16 = 1;
const MASK_KEEP_CONN: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolStatus {
    RequestComplete,
    /// Concurrent requests over one connection
    MultiplexingUnsupported,
    Overloaded,
    UnknownRole,
}

impl ProtocolStatus {
    fn id(&self) -> u8 {
        match self {
            Self::RequestComplete => 0,
            Self::MultiplexingUnsupported => 1,
            Self::Overloaded => 2,
            Self::UnknownRole => 3,
        }
    }

    fn from_id(id: u8) -> Result<Self, Error> {
        let status = match id {
            0 => Self::RequestComplete,
            1 => Self::MultiplexingUnsupported,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            _ => return Err(Error::UnsupportedProtocolStatus(id)),
        };
        Ok(status)
    }
}

/// A single FastCGI message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    /// Only the responder role is supported, so the role is not kept
    BeginRequest { keep_conn: bool },
    AbortRequest,
    EndRequest {
        app_status: u32,
        protocol_status: ProtocolStatus,
    },
    Params(Pairs),
    Stdin(Vec<u8>),
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Data(Vec<u8>),
    GetValues(Pairs),
    GetValuesResult(Pairs),
    UnknownType(u8),
}

impl Record {
    pub(crate) fn type_id(&self) -> u8 {
        match self {
            Self::BeginRequest { .. } => FCGI_BEGIN_REQUEST,
            Self::AbortRequest => FCGI_ABORT_REQUEST,
            Self::EndRequest { .. } => FCGI_END_REQUEST,
            Self::Params(_) => FCGI_PARAMS,
            Self::Stdin(_) => FCGI_STDIN,
            Self::Stdout(_) => FCGI_STDOUT,
            Self::Stderr(_) => FCGI_STDERR,
            Self::Data(_) => FCGI_DATA,
            Self::GetValues(_) => FCGI_GET_VALUES,
            Self::GetValuesResult(_) => FCGI_GET_VALUES_RESULT,
            Self::UnknownType(_) => FCGI_UNKNOWN_TYPE,
        }
    }

    pub(crate) fn end_request(app_status: u32, protocol_status: ProtocolStatus) -> Self {
        Self::EndRequest {
            app_status,
            protocol_status,
        }
    }

    pub(crate) fn from_bytes(type_id: u8, payload: Vec<u8>) -> Result<Self, Error> {
        let record = match type_id {
            FCGI_BEGIN_REQUEST => {
                let [role_1, role_0, flags, ..]: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| Error::MalformedRecordPayload("BeginRequest"))?;
                let role = u16::from_be_bytes([role_1, role_0]);
                if role != ROLE_RESPONDER {
                    return Err(Error::UnsupportedRole(role));
                }
                Self::BeginRequest {
                    keep_conn: flags & MASK_KEEP_CONN == MASK_KEEP_CONN,
                }
            }
            FCGI_ABORT_REQUEST => Self::AbortRequest,
            FCGI_END_REQUEST => {
                let [s3, s2, s1, s0, protocol_status, ..]: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| Error::MalformedRecordPayload("EndRequest"))?;
                Self::EndRequest {
                    app_status: u32::from_be_bytes([s3, s2, s1, s0]),
                    protocol_status: ProtocolStatus::from_id(protocol_status)?,
                }
            }
            FCGI_PARAMS => Self::Params(decode_pairs(payload)?),
            FCGI_STDIN => Self::Stdin(payload),
            FCGI_STDOUT => Self::Stdout(payload),
            FCGI_STDERR => Self::Stderr(payload),
            FCGI_DATA => Self::Data(payload),
            FCGI_GET_VALUES => Self::GetValues(decode_pairs(payload)?),
            FCGI_GET_VALUES_RESULT => Self::GetValuesResult(decode_pairs(payload)?),
            FCGI_UNKNOWN_TYPE => {
                let [unknown, ..]: [u8; 8] = payload
                    .try_into()
                    .map_err(|_| Error::MalformedRecordPayload("UnknownType"))?;
                Self::UnknownType(unknown)
            }
            _ => return Err(Error::UnknownRecordType(type_id)),
        };

        Ok(record)
    }

    pub(crate) fn write_payload<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        match self {
            Self::BeginRequest { keep_conn } => {
                writer.write_all(&ROLE_RESPONDER.to_be_bytes())?;
                writer.write_all(&[u8::from(*keep_conn), 0, 0, 0, 0, 0])
            }
            Self::AbortRequest => Ok(()),
            Self::EndRequest {
                app_status,
                protocol_status,
            } => {
                writer.write_all(&app_status.to_be_bytes())?;
                writer.write_all(&[protocol_status.id(), 0, 0, 0])
            }
            Self::Params(pairs) | Self::GetValues(pairs) | Self::GetValuesResult(pairs) => {
                encode_pairs(pairs, writer)
            }
            Self::Stdin(bytes) | Self::Stdout(bytes) | Self::Stderr(bytes) | Self::Data(bytes) => {
                writer.write_all(bytes)
            }
            Self::UnknownType(unknown) => writer.write_all(&[*unknown, 0, 0, 0, 0, 0, 0, 0]),
        }
    }

    /// Management records are not tied to a request
    pub(crate) fn is_management(&self) -> bool {
        MANAGEMENT_RECORD_TYPES.contains(&self.type_id())
    }
}

/// Returns true if records of this type may span several packets
pub(crate) fn is_stream(type_id: u8) -> bool {
    !DISCRETE_RECORD_TYPES.contains(&type_id)
}

// The high-order bit of the first byte of a length indicates the length's encoding. A high-order
// zero implies a one-byte encoding, a one a four-byte encoding.
fn read_pair_len<R: Read>(reader: &mut R) -> Result<usize, Error> {
    let mut first = [0u8; 1];
    reader
        .read_exact(&mut first)
        .map_err(|_| Error::MalformedRecordPayload("Params"))?;

    if first[0] <= 127 {
        return Ok(first[0] as usize);
    }

    let mut len_bytes = [first[0] & 0b0111_1111, 0, 0, 0];
    reader
        .read_exact(&mut len_bytes[1..])
        .map_err(|_| Error::MalformedRecordPayload("Params"))?;

    Ok(u32::from_be_bytes(len_bytes) as usize)
}

fn write_pair_len<W: Write>(len: usize, writer: &mut W) -> Result<(), io::Error> {
    if len > 127 {
        let mut len_bytes = (len as u32).to_be_bytes();
        len_bytes[0] |= 0b1000_0000;
        writer.write_all(&len_bytes)
    } else {
        writer.write_all(&[len as u8])
    }
}

// A name-value pair is the length of the name, the length of the value, the name, then the value
fn decode_pairs(bytes: Vec<u8>) -> Result<Pairs, Error> {
    let len = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes);
    let mut pairs = Pairs::new();

    while cursor.position() < len {
        let name_len = read_pair_len(&mut cursor)?;
        let value_len = read_pair_len(&mut cursor)?;

        let mut name = vec![0u8; name_len];
        let mut value = vec![0u8; value_len];

        cursor
            .read_exact(&mut name)
            .map_err(|_| Error::MalformedRecordPayload("Params"))?;
        cursor
            .read_exact(&mut value)
            .map_err(|_| Error::MalformedRecordPayload("Params"))?;

        let name = String::from_utf8(name).map_err(|_| Error::InvalidUtf8KeyValuePair)?;
        let value = String::from_utf8(value).map_err(|_| Error::InvalidUtf8KeyValuePair)?;

        pairs.insert(name, value);
    }

    Ok(pairs)
}

fn encode_pairs<W: Write>(pairs: &Pairs, writer: &mut W) -> Result<(), io::Error> {
    for (name, value) in pairs {
        write_pair_len(name.len(), writer)?;
        write_pair_len(value.len(), writer)?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(value.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn payload(record: &Record) -> Vec<u8> {
        let mut bytes = vec![];
        record.write_payload(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn long_pair_lengths_use_four_bytes() {
        let long = "x".repeat(200);
        let pairs = Pairs::from([("SHORT".to_string(), long.clone())]);
        let bytes = payload(&Record::Params(pairs));

        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..5], &[0x80, 0, 0, 200]);
        assert_eq!(bytes.len(), 1 + 4 + 5 + 200);

        assert_matches!(Record::from_bytes(FCGI_PARAMS, bytes), Ok(Record::Params(decoded)) => {
            assert_eq!(decoded.get("SHORT"), Some(&long));
        });
    }

    #[test]
    fn truncated_pairs_are_malformed() {
        assert_matches!(
            Record::from_bytes(FCGI_PARAMS, vec![4, 10, b'P', b'A', b'T', b'H']),
            Err(Error::MalformedRecordPayload("Params"))
        );
        assert_matches!(
            Record::from_bytes(FCGI_PARAMS, vec![1, 1, 0xff, 0xfe]),
            Err(Error::InvalidUtf8KeyValuePair)
        );
    }

    #[test]
    fn only_the_responder_role_is_accepted() {
        assert_matches!(
            Record::from_bytes(FCGI_BEGIN_REQUEST, vec![0, 1, 1, 0, 0, 0, 0, 0]),
            Ok(Record::BeginRequest { keep_conn: true })
        );
        assert_matches!(
            Record::from_bytes(FCGI_BEGIN_REQUEST, vec![0, 2, 0, 0, 0, 0, 0, 0]),
            Err(Error::UnsupportedRole(2))
        );
        assert_matches!(
            Record::from_bytes(FCGI_BEGIN_REQUEST, vec![0, 1]),
            Err(Error::MalformedRecordPayload("BeginRequest"))
        );
    }

    #[test]
    fn end_request_layout() {
        let bytes = payload(&Record::end_request(1, ProtocolStatus::UnknownRole));
        assert_eq!(bytes, [0, 0, 0, 1, 3, 0, 0, 0]);

        assert_matches!(
            Record::from_bytes(FCGI_END_REQUEST, vec![0, 0, 0, 0, 9, 0, 0, 0]),
            Err(Error::UnsupportedProtocolStatus(9))
        );
    }

    #[test]
    fn unknown_types() {
        assert_matches!(Record::from_bytes(42, vec![]), Err(Error::UnknownRecordType(42)));
        assert_eq!(payload(&Record::UnknownType(42)), [42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn record_kinds() {
        assert!(is_stream(FCGI_PARAMS));
        assert!(is_stream(FCGI_STDOUT));
        assert!(!is_stream(FCGI_BEGIN_REQUEST));
        assert!(Record::GetValues(Pairs::new()).is_management());
        assert!(!Record::Stdout(vec![]).is_management());
    }
}

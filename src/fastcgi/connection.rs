use super::record::{self, Pairs, Record};
use crate::error::Error;
use bufstream::BufStream;
use std::io::{self, Read, Write};

macro_rules! impl_expect {
    ($variant:ident, $payload:ty) => {
        paste::paste! {
            #[doc =
                "Returns the payload of the next record if it is a `" $variant "` record.\n\n"
                "# Errors\n\n"
                "Returns `Err(Some(Error))` if reading the connection failed, and `Err(None)` if "
                "the next record was something else."
            ]
            pub(crate) fn [<expect_ $variant:snake>](&mut self) -> Result<$payload, Option<Error>> {
                match self.read_record() {
                    Ok(Record::$variant(payload)) => Ok(payload),
                    Ok(_) => Err(None),
                    Err(e) => Err(Some(e)),
                }
            }
        }
    };
}

// Largest payload a single packet can carry
const MAX_PAYLOAD: usize = u16::MAX as usize;

// A client may send a record's content over several packets. This code calls the physical
// messages "packets" and the logically complete messages they add up to "records".
struct Packet {
    type_id: u8,
    content: Vec<u8>,
}

/// A buffered FastCGI connection over any byte stream
pub(crate) struct Connection<S: Read + Write> {
    stream: BufStream<S>,
}

impl<S: Read + Write> Connection<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
        }
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    fn read_packet(&mut self) -> Result<Packet, Error> {
        let mut header = [0u8; 8];
        self.stream
            .read_exact(&mut header)
            .map_err(Error::UnexpectedSocketClose)?;

        let [version, type_id, req_id_1, req_id_0, length_1, length_0, padding_length, _] = header;

        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }

        if u16::from_be_bytes([req_id_1, req_id_0]) > 1 {
            return Err(Error::MultiplexingUnsupported);
        }

        let length = u16::from_be_bytes([length_1, length_0]);
        let mut content = vec![0u8; length as usize];
        let mut padding = vec![0u8; padding_length as usize];

        self.stream
            .read_exact(&mut content)
            .map_err(Error::UnexpectedSocketClose)?;
        self.stream
            .read_exact(&mut padding)
            .map_err(Error::UnexpectedSocketClose)?;

        Ok(Packet { type_id, content })
    }

    /// Reads the next complete record, stitching stream packets together
    pub(crate) fn read_record(&mut self) -> Result<Record, Error> {
        let first = self.read_packet()?;
        let type_id = first.type_id;

        if !record::is_stream(type_id) || first.content.is_empty() {
            return Record::from_bytes(type_id, first.content);
        }

        let mut content = first.content;

        loop {
            let packet = self.read_packet()?;

            if packet.type_id != type_id {
                return Err(Error::MalformedRecordStream);
            }

            if packet.content.is_empty() {
                break;
            }

            content.extend(packet.content);
        }

        Record::from_bytes(type_id, content)
    }

    fn write_packet(&mut self, type_id: u8, request_id: u16, payload: &[u8]) -> Result<(), io::Error> {
        // Packets are padded to a multiple of 8 bytes, header included
        let unpadded_len = 8 + payload.len();
        let padding = (unpadded_len.div_ceil(8) * 8 - unpadded_len) as u8;

        let [id_1, id_0] = request_id.to_be_bytes();
        let [len_1, len_0] = (payload.len() as u16).to_be_bytes();

        self.stream
            .write_all(&[1, type_id, id_1, id_0, len_1, len_0, padding, 0])?;
        self.stream.write_all(payload)?;
        self.stream.write_all(&[0u8; 8][..padding as usize])
    }

    /// Writes a record, splitting payloads too large for one packet
    pub(crate) fn write_record(&mut self, record: &Record) -> Result<(), io::Error> {
        let mut payload = vec![];
        record.write_payload(&mut payload)?;

        let request_id = if record.is_management() { 0 } else { 1 };

        if payload.is_empty() {
            self.write_packet(record.type_id(), request_id, &[])?;
        }

        for chunk in payload.chunks(MAX_PAYLOAD) {
            self.write_packet(record.type_id(), request_id, chunk)?;
        }

        self.stream.flush()
    }

    impl_expect!(Params, Pairs);
    impl_expect!(Stdin, Vec<u8>);
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    /// A byte stream whose reads and writes go to separate buffers
    #[derive(Default)]
    pub(crate) struct Duplex {
        pub input: Cursor<Vec<u8>>,
        pub output: Vec<u8>,
    }

    impl Duplex {
        pub(crate) fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: vec![],
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Encodes records the way a web server would send them
    pub(crate) fn encode<I: IntoIterator<Item = Record>>(records: I) -> Vec<u8> {
        let mut connection = Connection::new(Duplex::default());
        for record in records {
            connection.write_record(&record).unwrap();
        }
        connection.get_ref().output.clone()
    }

    /// Decodes every record in `bytes`
    pub(crate) fn decode(bytes: Vec<u8>) -> Vec<Record> {
        let mut connection = Connection::new(Duplex::new(bytes));
        let mut records = vec![];
        loop {
            match connection.read_record() {
                Ok(record) => records.push(record),
                Err(Error::UnexpectedSocketClose(_)) => return records,
                Err(err) => panic!("failed to decode records: {err}"),
            }
        }
    }

    #[test]
    fn packets_are_padded() {
        let bytes = encode([Record::Stdout(b"HELLO".to_vec())]);
        assert_eq!(&bytes[..8], &[1, 6, 0, 1, 0, 5, 3, 0]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn management_records_use_request_zero() {
        let bytes = encode([Record::GetValuesResult(Pairs::new())]);
        assert_eq!(&bytes[..4], &[1, 10, 0, 0]);
    }

    #[test]
    fn stream_records_are_stitched_together() {
        let bytes = encode([
            Record::Stdin(b"HELLO".to_vec()),
            Record::Stdin(b"WORLD".to_vec()),
            Record::Stdin(vec![]),
        ]);

        assert_eq!(decode(bytes), [Record::Stdin(b"HELLOWORLD".to_vec())]);
    }

    #[test]
    fn large_payloads_span_several_packets() {
        let body = vec![7u8; MAX_PAYLOAD + 10];
        let bytes = encode([Record::Stdout(body.clone()), Record::Stdout(vec![])]);

        assert_eq!(decode(bytes), [Record::Stdout(body)]);
    }

    #[test]
    fn interleaved_streams_are_rejected() {
        let bytes = encode([Record::Stdin(b"HELLO".to_vec()), Record::Data(b"x".to_vec())]);
        let mut connection = Connection::new(Duplex::new(bytes));
        assert_matches!(connection.read_record(), Err(Error::MalformedRecordStream));
    }

    #[test]
    fn header_checks() {
        let mut bytes = encode([Record::Stdin(vec![])]);
        bytes[0] = 2;
        let mut connection = Connection::new(Duplex::new(bytes));
        assert_matches!(connection.read_record(), Err(Error::UnsupportedVersion(2)));

        let mut bytes = encode([Record::Stdin(vec![])]);
        bytes[3] = 2;
        let mut connection = Connection::new(Duplex::new(bytes));
        assert_matches!(connection.read_record(), Err(Error::MultiplexingUnsupported));

        let mut connection = Connection::new(Duplex::new(vec![1, 5]));
        assert_matches!(connection.read_record(), Err(Error::UnexpectedSocketClose(_)));
    }

    #[test]
    fn expecting_records() {
        let pairs = Pairs::from([("REQUEST_METHOD".to_string(), "GET".to_string())]);
        let bytes = encode([Record::Params(pairs.clone()), Record::Params(Pairs::new())]);
        let mut connection = Connection::new(Duplex::new(bytes));
        assert_eq!(connection.expect_params().ok(), Some(pairs));

        let bytes = encode([Record::Stdout(vec![])]);
        let mut connection = Connection::new(Duplex::new(bytes));
        assert_matches!(connection.expect_stdin(), Err(None));
    }
}

use bitstream_io::{BigEndian, BitReader, BitWriter};

use super::{
    ParseError,
    common::PacketComponent,
    edns::{self, ClientSubnet},
    enums::{Rcode, RecordType},
    header::Header,
    question::Question,
    record::{RData, Record},
};

/// A decoded DNS message. `Clone` is deep: labels, RDATA and options
/// are owned, so clones can be mutated from concurrent tasks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Build a recursion-desired query for `name`/`qtype` with a zero
    /// transaction ID; callers assign their own ID.
    pub fn new_query(name: &str, qtype: RecordType) -> Self {
        let mut message = Message::default();
        message.header.rd = true;
        message.questions.push(Question::new(name, qtype));
        message.update_counts();
        message
    }

    /// Response shell over `query`: same ID, question and RD, given
    /// rcode, QR and RA set.
    pub fn response_shell(query: &Message, rcode: Rcode) -> Self {
        let mut response = Message::default();
        response.header.id = query.header.id;
        response.header.qr = true;
        response.header.opcode = query.header.opcode;
        response.header.rd = query.header.rd;
        response.header.ra = true;
        response.header.rcode = rcode.into();
        response.questions = query.questions.clone();
        response.update_counts();
        response
    }

    pub fn update_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.additionals.len() as u16;
    }

    pub fn rcode(&self) -> Rcode {
        self.header.rcode.into()
    }

    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.header.rcode = rcode.into();
    }

    pub fn first_question(&self) -> Option<&Question> {
        self.questions.first()
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 12 {
            return Err(ParseError::TooShort);
        }
        let mut reader = BitReader::<_, BigEndian>::new(buf);

        let mut header = Header::default();
        header.read_with_buffer(&mut reader, buf)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let mut question = Question::default();
            question.read_with_buffer(&mut reader, buf)?;
            questions.push(question);
        }

        let mut read_section = |count: u16| -> Result<Vec<Record>, ParseError> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let mut record = Record::default();
                record.read_with_buffer(&mut reader, buf)?;
                records.push(record);
            }
            Ok(records)
        };

        let answers = read_section(header.ancount)?;
        let authorities = read_section(header.nscount)?;
        let additionals = read_section(header.arcount)?;

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, ParseError> {
        let mut message = self.clone();
        message.update_counts();

        let mut buf = Vec::with_capacity(512);
        let mut writer = BitWriter::<_, BigEndian>::new(&mut buf);

        message.header.write(&mut writer)?;
        for question in &message.questions {
            question.write(&mut writer)?;
        }
        for record in message
            .answers
            .iter()
            .chain(&message.authorities)
            .chain(&message.additionals)
        {
            record.write(&mut writer)?;
        }

        Ok(buf)
    }

    pub fn opt(&self) -> Option<&Record> {
        self.additionals
            .iter()
            .find(|record| record.rtype == RecordType::OPT)
    }

    pub fn has_edns(&self) -> bool {
        self.opt().is_some()
    }

    /// Ensure the message carries an OPT record advertising at least
    /// `payload_size`. Returns true when the record had to be added,
    /// i.e. the client did not speak EDNS0 itself.
    pub fn ensure_edns(&mut self, payload_size: u16) -> bool {
        if let Some(opt) = self
            .additionals
            .iter_mut()
            .find(|record| record.rtype == RecordType::OPT)
        {
            if opt.class < payload_size {
                opt.class = payload_size;
            }
            return false;
        }
        self.additionals.push(Record::new_opt(payload_size));
        self.update_counts();
        true
    }

    pub fn strip_edns(&mut self) {
        self.additionals.retain(|record| record.rtype != RecordType::OPT);
        self.update_counts();
    }

    /// UDP payload size the sender advertised, or the RFC 1035 default.
    pub fn max_udp_payload_size(&self) -> u16 {
        self.opt().map(|opt| opt.class.max(512)).unwrap_or(512)
    }

    /// DNSSEC OK bit from the OPT record.
    pub fn do_bit(&self) -> bool {
        self.opt().map(|opt| edns::opt_do_bit(opt.ttl)).unwrap_or(false)
    }

    /// Checking-disabled header bit (low bit of the Z field).
    pub fn cd_bit(&self) -> bool {
        (self.header.z & 0b001) != 0
    }

    /// Client Subnet option, if the query carries one.
    pub fn client_subnet(&self) -> Option<ClientSubnet> {
        let opt = self.opt()?;
        if let RData::Opt(options) = &opt.rdata {
            for option in options {
                if option.code == edns::OPT_CODE_CLIENT_SUBNET {
                    return edns::parse_client_subnet(&option.data);
                }
            }
        }
        None
    }

    /// Truncated rendition for UDP: question preserved, answer and
    /// authority sections cleared, TC set. The OPT record survives so
    /// the client learns it should retry over TCP with EDNS intact.
    pub fn truncated(&self) -> Self {
        let mut response = self.clone();
        response.header.tc = true;
        response.answers.clear();
        response.authorities.clear();
        response
            .additionals
            .retain(|record| record.rtype == RecordType::OPT);
        response.update_counts();
        response
    }

    /// Smallest TTL across answer and authority records, skipping the
    /// OPT pseudo-record.
    pub fn min_ttl(&self) -> Option<u32> {
        self.answers
            .iter()
            .chain(&self.authorities)
            .filter(|record| record.rtype != RecordType::OPT)
            .map(|record| record.ttl)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn query_roundtrip() {
        let mut query = Message::new_query("example.com", RecordType::A);
        query.header.id = 0x1234;

        let wire = query.to_wire().unwrap();
        let parsed = Message::parse(&wire).unwrap();
        assert_eq!(parsed, query);
        assert_eq!(parsed.first_question().unwrap().qname(), "example.com");
    }

    #[test]
    fn edns_shim_adds_and_strips() {
        let mut query = Message::new_query("example.com", RecordType::A);
        assert!(!query.has_edns());
        assert!(query.ensure_edns(1200));
        assert_eq!(query.max_udp_payload_size(), 1200);
        // Second call only bumps the size, never reports an upgrade.
        assert!(!query.ensure_edns(4096));
        assert_eq!(query.max_udp_payload_size(), 4096);

        query.strip_edns();
        assert!(!query.has_edns());
        assert_eq!(query.max_udp_payload_size(), 512);
    }

    #[test]
    fn truncated_keeps_question_and_opt() {
        let query = Message::new_query("example.com", RecordType::A);
        let mut response = Message::response_shell(&query, Rcode::NoError);
        response
            .answers
            .push(Record::new_a("example.com", 300, Ipv4Addr::new(1, 2, 3, 4)));
        response.additionals.push(Record::new_opt(1200));
        response.update_counts();

        let truncated = response.truncated();
        assert!(truncated.header.tc);
        assert_eq!(truncated.questions.len(), 1);
        assert!(truncated.answers.is_empty());
        assert!(truncated.has_edns());
    }

    #[test]
    fn parses_response_with_compressed_names() {
        // Hand-built response where the answer name is a pointer to
        // the question name at offset 12.
        let query = Message::new_query("example.com", RecordType::A);
        let mut wire = query.to_wire().unwrap();
        wire[7] = 1; // ancount
        wire.extend_from_slice(&[0xC0, 0x0C]); // name -> offset 12
        wire.extend_from_slice(&1u16.to_be_bytes()); // type A
        wire.extend_from_slice(&1u16.to_be_bytes()); // class IN
        wire.extend_from_slice(&300u32.to_be_bytes());
        wire.extend_from_slice(&4u16.to_be_bytes());
        wire.extend_from_slice(&[93, 184, 216, 34]);

        let parsed = Message::parse(&wire).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].name(), "example.com");
        assert_eq!(parsed.answers[0].rdata, RData::A(Ipv4Addr::new(93, 184, 216, 34)));
    }
}

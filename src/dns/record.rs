use std::net::{Ipv4Addr, Ipv6Addr};

use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{self, PacketComponent},
    edns::{self, EdnsOption},
    enums::RecordType,
};

/// SOA RDATA, kept typed so negative-cache TTLs can read MINIMUM.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Soa {
    pub mname: Vec<String>,
    pub rname: Vec<String>,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Record data. Types whose RDATA may carry compressed names are
/// decoded so re-serialization never emits stale pointers; everything
/// else passes through as raw bytes (RFC 3597 forbids compression in
/// unknown types, so raw passthrough is safe there).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// CNAME / NS / PTR / DNAME target.
    Name(Vec<String>),
    Mx {
        preference: u16,
        exchange: Vec<String>,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Vec<String>,
    },
    Soa(Soa),
    Opt(Vec<EdnsOption>),
    Raw(Vec<u8>),
}

impl Default for RData {
    fn default() -> Self {
        RData::Raw(Vec::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub labels: Vec<String>,
    pub rtype: RecordType,
    /// Raw class field. For OPT this is the requestor's UDP payload
    /// size (RFC 6891), for everything else the DNS class.
    pub class: u16,
    /// Raw TTL field. For OPT this packs extended rcode, version and
    /// flags.
    pub ttl: u32,
    pub rdata: RData,
}

impl Record {
    pub fn new_a(name: &str, ttl: u32, addr: Ipv4Addr) -> Self {
        Self {
            labels: common::name_to_labels(name),
            rtype: RecordType::A,
            class: 1,
            ttl,
            rdata: RData::A(addr),
        }
    }

    pub fn new_aaaa(name: &str, ttl: u32, addr: Ipv6Addr) -> Self {
        Self {
            labels: common::name_to_labels(name),
            rtype: RecordType::AAAA,
            class: 1,
            ttl,
            rdata: RData::Aaaa(addr),
        }
    }

    /// OPT pseudo-record advertising `payload_size`, no options.
    pub fn new_opt(payload_size: u16) -> Self {
        Self {
            labels: Vec::new(),
            rtype: RecordType::OPT,
            class: payload_size,
            ttl: 0,
            rdata: RData::Opt(Vec::new()),
        }
    }

    pub fn name(&self) -> String {
        common::canonical_name(&self.labels)
    }

    fn decode_rdata(
        rtype: RecordType,
        rdata: &[u8],
        packet_buf: &[u8],
    ) -> Result<RData, ParseError> {
        match rtype {
            RecordType::A if rdata.len() == 4 => Ok(RData::A(Ipv4Addr::new(
                rdata[0], rdata[1], rdata[2], rdata[3],
            ))),
            RecordType::AAAA if rdata.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(rdata);
                Ok(RData::Aaaa(Ipv6Addr::from(octets)))
            }
            RecordType::CNAME | RecordType::NS | RecordType::PTR | RecordType::DNAME => {
                let (labels, _) = common::read_name_from(rdata, 0, packet_buf)?;
                Ok(RData::Name(labels))
            }
            RecordType::MX => {
                if rdata.len() < 2 {
                    return Err(ParseError::UnexpectedEof);
                }
                let preference = u16::from_be_bytes([rdata[0], rdata[1]]);
                let (exchange, _) = common::read_name_from(rdata, 2, packet_buf)?;
                Ok(RData::Mx {
                    preference,
                    exchange,
                })
            }
            RecordType::SRV => {
                if rdata.len() < 6 {
                    return Err(ParseError::UnexpectedEof);
                }
                let priority = u16::from_be_bytes([rdata[0], rdata[1]]);
                let weight = u16::from_be_bytes([rdata[2], rdata[3]]);
                let port = u16::from_be_bytes([rdata[4], rdata[5]]);
                let (target, _) = common::read_name_from(rdata, 6, packet_buf)?;
                Ok(RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                })
            }
            RecordType::SOA => {
                let (mname, pos) = common::read_name_from(rdata, 0, packet_buf)?;
                let (rname, pos) = common::read_name_from(rdata, pos, packet_buf)?;
                if pos + 20 > rdata.len() {
                    return Err(ParseError::UnexpectedEof);
                }
                let word = |at: usize| {
                    u32::from_be_bytes([rdata[at], rdata[at + 1], rdata[at + 2], rdata[at + 3]])
                };
                Ok(RData::Soa(Soa {
                    mname,
                    rname,
                    serial: word(pos),
                    refresh: word(pos + 4),
                    retry: word(pos + 8),
                    expire: word(pos + 12),
                    minimum: word(pos + 16),
                }))
            }
            RecordType::OPT => Ok(RData::Opt(edns::parse_options(rdata)?)),
            _ => Ok(RData::Raw(rdata.to_vec())),
        }
    }

    fn encode_rdata(&self) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::new();
        match &self.rdata {
            RData::A(addr) => out.extend_from_slice(&addr.octets()),
            RData::Aaaa(addr) => out.extend_from_slice(&addr.octets()),
            RData::Name(labels) => common::append_name(&mut out, labels)?,
            RData::Mx {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                common::append_name(&mut out, exchange)?;
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                common::append_name(&mut out, target)?;
            }
            RData::Soa(soa) => {
                common::append_name(&mut out, &soa.mname)?;
                common::append_name(&mut out, &soa.rname)?;
                out.extend_from_slice(&soa.serial.to_be_bytes());
                out.extend_from_slice(&soa.refresh.to_be_bytes());
                out.extend_from_slice(&soa.retry.to_be_bytes());
                out.extend_from_slice(&soa.expire.to_be_bytes());
                out.extend_from_slice(&soa.minimum.to_be_bytes());
            }
            RData::Opt(options) => out.extend_from_slice(&edns::encode_options(options)),
            RData::Raw(bytes) => out.extend_from_slice(bytes),
        }
        Ok(out)
    }
}

impl PacketComponent for Record {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        common::write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.class)?;
        writer.write_var::<u32>(32, self.ttl)?;
        let rdata = self.encode_rdata()?;
        writer.write_var::<u16>(16, rdata.len() as u16)?;
        writer.write_bytes(&rdata)?;
        Ok(())
    }

    fn read_with_buffer<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = common::read_labels(reader, packet_buf)?;
        self.rtype = reader.read_var::<u16>(16)?.into();
        self.class = reader.read_var::<u16>(16)?;
        self.ttl = reader.read_var::<u32>(32)?;
        let rdlen = reader.read_var::<u16>(16)? as usize;
        let mut rdata = vec![0; rdlen];
        reader.read_bytes(&mut rdata)?;
        self.rdata = Self::decode_rdata(self.rtype, &rdata, packet_buf)?;
        Ok(())
    }
}

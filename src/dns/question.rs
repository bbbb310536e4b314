use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{self, PacketComponent},
    enums::{RecordClass, RecordType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Question {
    pub labels: Vec<String>,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Self {
            labels: common::name_to_labels(name),
            qtype,
            qclass: RecordClass::IN,
        }
    }

    /// Lowercase dotted QNAME, used for matching and fingerprinting.
    pub fn qname(&self) -> String {
        common::canonical_name(&self.labels)
    }
}

impl PacketComponent for Question {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        common::write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }

    fn read_with_buffer<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = common::read_labels(reader, packet_buf)?;
        self.qtype = reader.read_var::<u16>(16)?.into();
        self.qclass = reader.read_var::<u16>(16)?.into();
        Ok(())
    }
}

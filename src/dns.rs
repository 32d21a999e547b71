//! DNS message parsing and construction.

use std::net::{Ipv4Addr, Ipv6Addr};

use clap::ValueEnum;

use crate::error::DnsError;

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 64;

/// Largest message a 16-bit length can describe.
pub const MAX_MESSAGE_LEN: usize = 65535;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_DNAME: u16 = 39;
pub const CLASS_IN: u16 = 1;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_NXDOMAIN: u8 = 3;

const FLAG_QR: u16 = 0x8000;
const OPCODE_MASK: u16 = 0x7800;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

/// TTL of synthesized records for blocked domains.
const BLOCKED_TTL: u32 = 300;

/// How blocked domains are answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BlockPolicy {
    /// NOERROR with an unspecified address (0.0.0.0 or ::).
    #[default]
    Sinkhole,
    /// NXDOMAIN with no records.
    #[value(name = "nxdomain")]
    NxDomain,
}

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    /// Name as it appeared on the wire, without the trailing dot.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuestion {
    /// Lowercased name used for filtering.
    pub fn domain(&self) -> String {
        normalize_domain(&self.name)
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, DnsError> {
        let name = reader.name()?;
        let qtype = reader.u16()?;
        let qclass = reader.u16()?;

        Ok(Self {
            name,
            qtype,
            qclass,
        })
    }

    fn write(&self, buf: &mut Vec<u8>) {
        encode_name(buf, &self.name);
        buf.extend_from_slice(&self.qtype.to_be_bytes());
        buf.extend_from_slice(&self.qclass.to_be_bytes());
    }
}

/// A parsed DNS query.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub flags: u16,
    /// The first question; any further questions are ignored.
    pub question: DnsQuestion,
}

impl DnsQuery {
    /// Parse a DNS query from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, DnsError> {
        let header = Header::read(data)?;
        if header.flags & FLAG_QR != 0 {
            return Err(DnsError::NotAQuery);
        }
        if header.qdcount == 0 {
            return Err(DnsError::NoQuestion);
        }

        let mut reader = Reader::new(data, HEADER_LEN);
        let question = DnsQuestion::read(&mut reader)?;

        Ok(Self {
            id: header.id,
            flags: header.flags,
            question,
        })
    }

    pub fn domain(&self) -> String {
        self.question.domain()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_question(&self.question)
    }
}

/// Canonical encoding of a question, independent of message ID and flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Box<[u8]>);

impl CacheKey {
    /// Lowercased wire-format name followed by QTYPE and QCLASS.
    pub fn from_question(question: &DnsQuestion) -> Self {
        let mut buf = Vec::with_capacity(question.name.len() + 6);
        encode_name(&mut buf, &normalize_domain(&question.name));
        buf.extend_from_slice(&question.qtype.to_be_bytes());
        buf.extend_from_slice(&question.qclass.to_be_bytes());

        Self(buf.into_boxed_slice())
    }
}

/// A DNS resource record.
///
/// `rdata` never contains compression pointers, so a record can be written
/// into any message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsRecord {
    fn read(reader: &mut Reader<'_>) -> Result<Self, DnsError> {
        let name = reader.name()?;
        let rtype = reader.u16()?;
        let class = reader.u16()?;
        let ttl = reader.u32()?;
        let rdlength = reader.u16()? as usize;
        let end = reader.pos + rdlength;
        if end > reader.data.len() {
            return Err(DnsError::Truncated);
        }

        let rdata = match rtype {
            TYPE_NS | TYPE_CNAME | TYPE_PTR | TYPE_DNAME => {
                let mut rdata = Vec::with_capacity(rdlength);
                encode_name(&mut rdata, &reader.name()?);
                rdata
            }
            TYPE_MX => {
                let mut rdata = reader.bytes(2)?.to_vec();
                encode_name(&mut rdata, &reader.name()?);
                rdata
            }
            TYPE_SRV => {
                let mut rdata = reader.bytes(6)?.to_vec();
                encode_name(&mut rdata, &reader.name()?);
                rdata
            }
            TYPE_SOA => {
                let mut rdata = Vec::with_capacity(rdlength);
                encode_name(&mut rdata, &reader.name()?);
                encode_name(&mut rdata, &reader.name()?);
                rdata.extend_from_slice(reader.bytes(20)?);
                rdata
            }
            _ => reader.bytes(rdlength)?.to_vec(),
        };
        if reader.pos != end {
            return Err(DnsError::BadRecordData);
        }

        Ok(Self {
            name,
            rtype,
            class,
            // RFC 2181 §8: values with the top bit set count as zero.
            ttl: if ttl > i32::MAX as u32 { 0 } else { ttl },
            rdata,
        })
    }
}

/// Minimum TTL across a record set; `None` for an empty set.
pub fn ttl_seconds(records: &[DnsRecord]) -> Option<u32> {
    records.iter().map(|r| r.ttl).min()
}

/// A DNS response.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

impl DnsResponse {
    /// Parse the header, questions and answer section of a response.
    pub fn parse(data: &[u8]) -> Result<Self, DnsError> {
        let header = Header::read(data)?;
        if header.flags & FLAG_QR == 0 {
            return Err(DnsError::NotAResponse);
        }

        let mut reader = Reader::new(data, HEADER_LEN);
        let questions = (0..header.qdcount)
            .map(|_| DnsQuestion::read(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;
        let answers = (0..header.ancount)
            .map(|_| DnsRecord::read(&mut reader))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: header.id,
            flags: header.flags,
            questions,
            answers,
        })
    }

    /// Create a NOERROR response to `query` carrying `answers`.
    pub fn answer(query: &DnsQuery, answers: Vec<DnsRecord>) -> Self {
        Self {
            id: query.id,
            flags: response_flags(query.flags, RCODE_NOERROR),
            questions: vec![query.question.clone()],
            answers,
        }
    }

    /// Create the response for a blocked query.
    pub fn blocked(query: &DnsQuery, policy: BlockPolicy) -> Self {
        let question = &query.question;

        match policy {
            BlockPolicy::NxDomain => Self {
                id: query.id,
                flags: response_flags(query.flags, RCODE_NXDOMAIN),
                questions: vec![question.clone()],
                answers: Vec::new(),
            },
            BlockPolicy::Sinkhole => {
                let rdata = match question.qtype {
                    TYPE_A => Some(Ipv4Addr::UNSPECIFIED.octets().to_vec()),
                    TYPE_AAAA => Some(Ipv6Addr::UNSPECIFIED.octets().to_vec()),
                    _ => None,
                };
                let answers = rdata
                    .map(|rdata| DnsRecord {
                        name: question.name.clone(),
                        rtype: question.qtype,
                        class: question.qclass,
                        ttl: BLOCKED_TTL,
                        rdata,
                    })
                    .into_iter()
                    .collect();

                Self::answer(query, answers)
            }
        }
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000F) as u8
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    /// Encode the response to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        for q in &self.questions {
            q.write(&mut data);
        }

        for a in &self.answers {
            // Point at the first question's name when it matches.
            if self.questions.first().is_some_and(|q| q.name == a.name) {
                data.extend_from_slice(&[0xC0, 0x0C]);
            } else {
                encode_name(&mut data, &a.name);
            }
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }
}

/// Read the transaction ID of any DNS message.
pub fn message_id(data: &[u8]) -> Result<u16, DnsError> {
    Header::read(data).map(|h| h.id)
}

/// Read the transaction ID of a message, requiring the QR bit.
pub fn response_id(data: &[u8]) -> Result<u16, DnsError> {
    let header = Header::read(data)?;
    if header.flags & FLAG_QR == 0 {
        return Err(DnsError::NotAResponse);
    }

    Ok(header.id)
}

/// Lowercase a domain and strip its trailing dot.
pub fn normalize_domain(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn response_flags(query_flags: u16, rcode: u8) -> u16 {
    FLAG_QR | (query_flags & (OPCODE_MASK | FLAG_RD)) | FLAG_RA | u16::from(rcode)
}

/// Write a dotted name in wire format, undoing [`escape_label`].
fn encode_name(buf: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    let mut label = Vec::with_capacity(63);
    let mut i = 0;

    while i < bytes.len() {
        match &bytes[i..] {
            [b'.', ..] => {
                push_label(buf, &mut label);
                i += 1;
            }
            [b'\\', d0 @ b'0'..=b'9', d1 @ b'0'..=b'9', d2 @ b'0'..=b'9', ..] => {
                let value = u16::from(d0 - b'0') * 100 + u16::from(d1 - b'0') * 10 + u16::from(d2 - b'0');
                label.push(value.min(255) as u8);
                i += 4;
            }
            [b'\\', escaped, ..] => {
                label.push(*escaped);
                i += 2;
            }
            [b, ..] => {
                label.push(*b);
                i += 1;
            }
            [] => break,
        }
    }
    push_label(buf, &mut label);
    buf.push(0);
}

fn push_label(buf: &mut Vec<u8>, label: &mut Vec<u8>) {
    if label.is_empty() {
        return;
    }
    let len = label.len().min(63);
    buf.push(len as u8);
    buf.extend_from_slice(&label[..len]);
    label.clear();
}

/// Append a wire label in presentation form (RFC 1035 §5.1).
///
/// Dots and backslashes are backslash-escaped; bytes outside printable
/// ASCII become `\DDD`.
fn escape_label(name: &mut String, label: &[u8]) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                name.push('\\');
                name.push(b as char);
            }
            0x21..=0x7E => name.push(b as char),
            _ => {
                name.push('\\');
                name.push_str(&format!("{b:03}"));
            }
        }
    }
}

struct Header {
    id: u16,
    flags: u16,
    qdcount: u16,
    ancount: u16,
}

impl Header {
    fn read(data: &[u8]) -> Result<Self, DnsError> {
        if data.len() < HEADER_LEN {
            return Err(DnsError::Truncated);
        }

        Ok(Self {
            id: u16::from_be_bytes([data[0], data[1]]),
            flags: u16::from_be_bytes([data[2], data[3]]),
            qdcount: u16::from_be_bytes([data[4], data[5]]),
            ancount: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// Bounds-checked cursor over a message.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DnsError> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(DnsError::Truncated)?;
        self.pos += len;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, DnsError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DnsError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a possibly compressed name, leaving the cursor after it.
    fn name(&mut self) -> Result<String, DnsError> {
        let mut name = String::new();
        let mut pos = self.pos;
        let mut resume = None;
        let mut jumps = 0;
        let mut wire_len = 1;

        loop {
            let len = *self.data.get(pos).ok_or(DnsError::Truncated)? as usize;
            match len & 0xC0 {
                0x00 if len == 0 => {
                    pos += 1;
                    break;
                }
                0x00 => {
                    let label = self
                        .data
                        .get(pos + 1..pos + 1 + len)
                        .ok_or(DnsError::Truncated)?;
                    wire_len += len + 1;
                    if wire_len > MAX_NAME_LEN {
                        return Err(DnsError::NameTooLong);
                    }
                    if !name.is_empty() {
                        name.push('.');
                    }
                    escape_label(&mut name, label);
                    pos += 1 + len;
                }
                0xC0 => {
                    let low = *self.data.get(pos + 1).ok_or(DnsError::Truncated)? as usize;
                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        return Err(DnsError::PointerLoop);
                    }
                    resume.get_or_insert(pos + 2);
                    pos = ((len & 0x3F) << 8) | low;
                }
                _ => return Err(DnsError::BadLabel),
            }
        }

        self.pos = resume.unwrap_or(pos);
        Ok(name)
    }
}

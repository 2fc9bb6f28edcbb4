use tokio_util::bytes::{Buf, BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Largest number of holding registers a single read-holding-registers request may ask for.
pub const MAX_READ_COUNT: u16 = 125;

const READ_HOLDINGS: u8 = 3;
const MBAP_HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    /// 1-based holding register index.
    pub address: u16,
    pub count: u16,
}

#[derive(Debug)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    ErrorCode(u8),
    GetHoldings { values: Vec<u16> },
}

pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let Some(pdu_address) = req.address.checked_sub(1) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "holding register addresses start at 1",
            ));
        };
        dst.reserve(MBAP_HEADER_LEN + 6);
        dst.put_u16(req.transaction_id);
        // Protocol identifier, then the length of everything after the length field.
        dst.put_u16(0);
        dst.put_u16(6);
        dst.put_u8(req.device_id);
        dst.put_u8(READ_HOLDINGS);
        dst.put_u16(pdu_address);
        dst.put_u16(req.count);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            let Some((header, remainder)) = src.split_first_chunk::<MBAP_HEADER_LEN>() else {
                return Ok(None);
            };
            let [t0, t1, p0, p1, l0, l1] = *header;
            let transaction_id = u16::from_be_bytes([t0, t1]);
            if u16::from_be_bytes([p0, p1]) != 0 {
                // Not a modbus frame start, resynchronize.
                src.advance(1);
                continue;
            }
            let required_length = usize::from(u16::from_be_bytes([l0, l1]));
            let Some((data, _)) = remainder.split_at_checked(required_length) else {
                return Ok(None);
            };
            let [device_id, function_code, code, payload @ ..] = data else {
                src.advance(1);
                continue;
            };
            let (device_id, function_code, code) = (*device_id, *function_code, *code);
            let kind = if function_code & 0x80 != 0 {
                ResponseKind::ErrorCode(code)
            } else if function_code == READ_HOLDINGS {
                // `code` is the payload byte count here. The MBAP length is already known and
                // authoritative.
                let values = payload
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                ResponseKind::GetHoldings { values }
            } else {
                trace!(message = "skipping response to an unexpected function", function_code);
                src.advance(MBAP_HEADER_LEN + required_length);
                continue;
            };
            src.advance(MBAP_HEADER_LEN + required_length);
            return Ok(Some(Response { device_id, transaction_id, kind }));
        }
    }
}

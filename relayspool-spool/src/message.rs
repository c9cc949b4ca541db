//! Message loading
//!
//! Turns the raw bytes of a spool file into the sender, the per-role
//! recipient lists and the payload handed to the transport. The payload is
//! rebuilt from the original header fields with every `Bcc` field removed,
//! followed by the untouched body.

use std::sync::Arc;

use mailparse::{MailAddr, MailHeader, addrparse_header, parse_headers};

use crate::error::MessageError;

/// A spool file parsed into what the delivery core needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledMessage {
    /// Envelope sender (empty for the null reverse path)
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Header fields without `Bcc`, a blank line, then the body verbatim
    pub payload: Arc<[u8]>,
}

impl SpooledMessage {
    /// Parse a spool file.
    ///
    /// # Errors
    /// Returns an error if the header section is malformed, or if a `To`,
    /// `Cc` or `Bcc` field is present but is not a valid address list.
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        let (headers, body_offset) = parse_headers(raw)?;

        let from = sender(&headers);
        let to = recipients(&headers, "To")?;
        let cc = recipients(&headers, "Cc")?;
        let bcc = recipients(&headers, "Bcc")?;

        let mut payload = Vec::with_capacity(raw.len());
        for header in headers.iter().filter(|h| !is_named(h, "Bcc")) {
            payload.extend_from_slice(header.get_key_ref().as_bytes());
            payload.extend_from_slice(b": ");
            push_crlf(&mut payload, header.get_value_raw().trim_ascii_start());
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(b"\r\n");
        payload.extend_from_slice(raw.get(body_offset..).unwrap_or_default());

        Ok(Self {
            from,
            to,
            cc,
            bcc,
            payload: Arc::from(payload),
        })
    }

    /// Number of recipients across all roles
    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

fn is_named(header: &MailHeader<'_>, name: &str) -> bool {
    header.get_key_ref().eq_ignore_ascii_case(name)
}

/// The first mailbox of the first `From` field. Falls back to the trimmed
/// raw value when the field is not an address list.
fn sender(headers: &[MailHeader<'_>]) -> String {
    let Some(header) = headers.iter().find(|h| is_named(h, "From")) else {
        return String::new();
    };

    match addrparse_header(header) {
        Ok(list) => list
            .iter()
            .find_map(|addr| match addr {
                MailAddr::Single(info) => Some(info.addr.clone()),
                MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
            })
            .unwrap_or_default(),
        Err(_) => header.get_value().trim().to_string(),
    }
}

/// Every address of every field called `name`, groups flattened, keeping
/// the first occurrence of each address.
fn recipients(
    headers: &[MailHeader<'_>],
    name: &'static str,
) -> Result<Vec<String>, MessageError> {
    let mut addresses: Vec<String> = Vec::new();

    for header in headers.iter().filter(|h| is_named(h, name)) {
        let list = addrparse_header(header).map_err(|e| MessageError::InvalidAddressList {
            header: name,
            reason: e.to_string(),
        })?;

        for addr in list.iter() {
            let infos = match addr {
                MailAddr::Single(info) => std::slice::from_ref(info),
                MailAddr::Group(group) => group.addrs.as_slice(),
            };
            for info in infos {
                if !addresses.contains(&info.addr) {
                    addresses.push(info.addr.clone());
                }
            }
        }
    }

    Ok(addresses)
}

/// Append `value`, turning any bare LF into CRLF
fn push_crlf(out: &mut Vec<u8>, value: &[u8]) {
    let mut previous = 0u8;
    for &byte in value {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }
}

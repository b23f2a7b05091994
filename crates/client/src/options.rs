//! Turns user-supplied `<id>,<value>` strings and the auth token into CoAP
//! option records.

use crate::error::ClientError;

pub const OBSERVE: u16 = 6;
pub const URI_PATH: u16 = 11;
pub const CONTENT_FORMAT: u16 = 12;
pub const URI_QUERY: u16 = 15;

const HEX_PREFIX: &str = "0x";

/// One option as it will be attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRecord {
    pub id: u16,
    pub value: Vec<u8>,
}

impl OptionRecord {
    pub fn new(id: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

/// Encoder output: records in insertion order plus the resolved
/// subscription intent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedOptions {
    pub records: Vec<OptionRecord>,
    pub observe: bool,
}

impl EncodedOptions {
    /// Records with any Observe option dropped, for requests that set their own.
    pub(crate) fn without_observe(&self) -> Vec<OptionRecord> {
        self.records
            .iter()
            .filter(|r| r.id != OBSERVE)
            .cloned()
            .collect()
    }
}

pub fn encode_options(
    entries: &[String],
    auth: Option<&str>,
    observe: bool,
) -> Result<EncodedOptions, ClientError> {
    let mut records = entries
        .iter()
        .map(|entry| parse_entry(entry))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(token) = auth.filter(|t| !t.is_empty()) {
        records.push(OptionRecord::new(URI_QUERY, format!("auth={token}")));
    }

    // A hand-written Observe=0 means the user wants a subscription.
    let sniffed = records
        .iter()
        .find(|r| r.id == OBSERVE)
        .is_some_and(|r| r.value == [0]);
    if sniffed && !observe {
        tracing::debug!("observe intent taken from explicit Observe=0 option");
    }

    Ok(EncodedOptions {
        records,
        observe: observe || sniffed,
    })
}

fn parse_entry(entry: &str) -> Result<OptionRecord, ClientError> {
    let invalid = || ClientError::InvalidOptionFormat {
        entry: entry.to_string(),
    };

    let (id, raw) = entry.split_once(',').ok_or_else(invalid)?;
    // Decimal digits only: no sign, no surrounding whitespace.
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let id: u16 = id.parse().map_err(|_| invalid())?;

    let value = match raw.strip_prefix(HEX_PREFIX) {
        Some(digits) => hex::decode(digits).map_err(|source| ClientError::InvalidOptionValue {
            entry: entry.to_string(),
            source,
        })?,
        None => raw.as_bytes().to_vec(),
    };

    Ok(OptionRecord { id, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hex_value_is_decoded() {
        let encoded = encode_options(&entries(&["17,0x48656c6c6f"]), None, false).unwrap();
        assert_eq!(encoded.records, vec![OptionRecord::new(17, "Hello")]);
        assert!(!encoded.observe);
    }

    #[test]
    fn plain_value_is_taken_literally() {
        let encoded = encode_options(&entries(&["15,a=b"]), None, false).unwrap();
        assert_eq!(encoded.records[0].value, b"a=b");
    }

    #[test]
    fn only_first_comma_splits() {
        let encoded = encode_options(&entries(&["15,x,y,z"]), None, false).unwrap();
        assert_eq!(encoded.records[0], OptionRecord::new(15, "x,y,z"));
    }

    #[test]
    fn observe_zero_sets_intent() {
        let encoded = encode_options(&entries(&["6,0x00"]), None, false).unwrap();
        assert!(encoded.observe);
    }

    #[test]
    fn other_observe_encodings_leave_intent_alone() {
        let encoded = encode_options(&entries(&["6,0"]), None, false).unwrap();
        assert!(!encoded.observe, "literal '0' is the byte 0x30");

        let encoded = encode_options(&entries(&["6,0x0000"]), None, false).unwrap();
        assert!(!encoded.observe);
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        let err = encode_options(&entries(&["abc,value"]), None, false).unwrap_err();
        match err {
            ClientError::InvalidOptionFormat { entry } => assert_eq!(entry, "abc,value"),
            other => panic!("expected InvalidOptionFormat, got {other:?}"),
        }
    }

    #[test]
    fn signed_or_padded_id_is_rejected() {
        for entry in ["+17,x", " 17,x", "17 ,x", "-1,x", ",x"] {
            let err = encode_options(&entries(&[entry]), None, false).unwrap_err();
            assert!(
                matches!(err, ClientError::InvalidOptionFormat { .. }),
                "{entry:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn missing_comma_is_rejected() {
        let err = encode_options(&entries(&["17"]), None, false).unwrap_err();
        assert!(matches!(err, ClientError::InvalidOptionFormat { .. }));
    }

    #[test]
    fn id_out_of_range_is_rejected() {
        let err = encode_options(&entries(&["70000,x"]), None, false).unwrap_err();
        assert!(matches!(err, ClientError::InvalidOptionFormat { .. }));
    }

    #[test]
    fn bad_hex_is_reported() {
        let err = encode_options(&entries(&["17,0xzz"]), None, false).unwrap_err();
        assert!(matches!(err, ClientError::InvalidOptionValue { .. }));
    }

    #[test]
    fn auth_token_becomes_trailing_query() {
        let encoded =
            encode_options(&entries(&["17,0x01"]), Some("1e1017e6"), false).unwrap();
        assert_eq!(encoded.records.len(), 2);
        assert_eq!(encoded.records[1], OptionRecord::new(URI_QUERY, "auth=1e1017e6"));
    }

    #[test]
    fn empty_auth_adds_nothing() {
        let encoded = encode_options(&[], Some(""), true).unwrap();
        assert!(encoded.records.is_empty());
        assert!(encoded.observe);
    }

    #[test]
    fn insertion_order_is_kept() {
        let encoded = encode_options(&entries(&["60,a", "4,b", "15,c"]), None, false).unwrap();
        let ids: Vec<u16> = encoded.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![60, 4, 15]);
    }
}

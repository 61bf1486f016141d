//! Free-form sequence classification for `/analysis/sequence`.
//!
//! Pasted text is classified by ordered rules, first match wins:
//!
//! 1. only `0`/`1` once whitespace is removed → bit string
//! 2. two or more separated decimal tokens → bits (all 0/1) or bytes (all 0..=255)
//! 3. only hex digits once whitespace is removed → hex (even length required)
//! 4. anything else → base64, validated by the service
//!
//! Rule 2 depends on the token count, not on the character class, so the
//! rules stay separate checks rather than one pattern.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("Unrecognized format: input is empty")]
    UnrecognizedFormat,

    /// Hex must encode whole bytes.
    #[error("Hex input has odd length {0}")]
    OddHexLength(usize),

    #[error("Numeric token {0} is outside 0..=255")]
    UnsupportedNumericRange(String),
}

/// The classified data; exactly one encoding per payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SequenceData {
    #[serde(rename = "data_bits")]
    Bits(String),
    #[serde(rename = "data_numbers")]
    Bytes(Vec<u8>),
    #[serde(rename = "data_hex")]
    Hex(String),
    #[serde(rename = "data_base64")]
    Base64(String),
}

impl SequenceData {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bits(_) => "bits",
            Self::Bytes(_) => "bytes",
            Self::Hex(_) => "hex",
            Self::Base64(_) => "base64",
        }
    }
}

/// Request body for sequence analysis: one data field plus an optional cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingPayload {
    #[serde(flatten)]
    pub data: SequenceData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_bits: Option<u32>,
}

impl EncodingPayload {
    pub fn with_limit_bits(mut self, limit_bits: Option<u32>) -> Self {
        self.limit_bits = limit_bits;
        self
    }
}

/// Classify `text` into a payload ready for `analyze_sequence`.
pub fn classify(text: &str) -> Result<EncodingPayload, EncodingError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EncodingError::UnrecognizedFormat);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();

    let data = match as_bit_string(&compact) {
        Some(bits) => bits,
        None => match as_numeric_tokens(trimmed)? {
            Some(numeric) => numeric,
            None => match as_hex(&compact)? {
                Some(hex) => hex,
                None => SequenceData::Base64(compact),
            },
        },
    };

    Ok(EncodingPayload {
        data,
        limit_bits: None,
    })
}

/// Rule 1.
fn as_bit_string(compact: &str) -> Option<SequenceData> {
    compact
        .chars()
        .all(|c| c == '0' || c == '1')
        .then(|| SequenceData::Bits(compact.to_string()))
}

/// Rule 2. `Ok(None)` falls through to the next rule.
fn as_numeric_tokens(trimmed: &str) -> Result<Option<SequenceData>, EncodingError> {
    let tokens: Vec<&str> = trimmed
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.len() < 2 || !tokens.iter().all(|t| t.bytes().all(|b| b.is_ascii_digit())) {
        return Ok(None);
    }

    // Digit-only tokens only fail to parse on overflow.
    let values: Vec<Option<u64>> = tokens.iter().map(|t| t.parse::<u64>().ok()).collect();

    if values.iter().all(|v| matches!(v, Some(0) | Some(1))) {
        let bits = values
            .iter()
            .map(|v| if *v == Some(1) { '1' } else { '0' })
            .collect();
        return Ok(Some(SequenceData::Bits(bits)));
    }

    let mut bytes = Vec::with_capacity(values.len());
    for (token, value) in tokens.iter().zip(&values) {
        match value.and_then(|v| u8::try_from(v).ok()) {
            Some(byte) => bytes.push(byte),
            None => return Err(EncodingError::UnsupportedNumericRange((*token).to_string())),
        }
    }
    Ok(Some(SequenceData::Bytes(bytes)))
}

/// Rule 3.
fn as_hex(compact: &str) -> Result<Option<SequenceData>, EncodingError> {
    if !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(None);
    }
    if compact.len() % 2 != 0 {
        return Err(EncodingError::OddHexLength(compact.len()));
    }
    Ok(Some(SequenceData::Hex(compact.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(text: &str) -> SequenceData {
        classify(text).unwrap().data
    }

    #[test]
    fn plain_binary_digits() {
        assert_eq!(data("0110"), SequenceData::Bits("0110".into()));
        assert_eq!(data("  01 10\n11 "), SequenceData::Bits("011011".into()));
    }

    #[test]
    fn tokenized_decimal_bytes() {
        assert_eq!(data("1 2 3"), SequenceData::Bytes(vec![1, 2, 3]));
        assert_eq!(data("12, 200;7"), SequenceData::Bytes(vec![12, 200, 7]));
        assert_eq!(data("0 255"), SequenceData::Bytes(vec![0, 255]));
    }

    #[test]
    fn tokenized_zero_one_values_become_bits() {
        assert_eq!(data("0 1 1"), SequenceData::Bits("011".into()));
        assert_eq!(data("0,1,1,0"), SequenceData::Bits("0110".into()));
        // Leading zeros still read as the value 1.
        assert_eq!(data("001;0"), SequenceData::Bits("10".into()));
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        assert_eq!(
            classify("999 1 2"),
            Err(EncodingError::UnsupportedNumericRange("999".into()))
        );
        assert_eq!(
            classify("1, 99999999999999999999999"),
            Err(EncodingError::UnsupportedNumericRange(
                "99999999999999999999999".into()
            ))
        );
    }

    #[test]
    fn single_numeric_token_is_not_tokenized() {
        // One token: falls through to hex.
        assert_eq!(data("1234"), SequenceData::Hex("1234".into()));
        assert_eq!(classify("123"), Err(EncodingError::OddHexLength(3)));
    }

    #[test]
    fn hex_keeps_original_case() {
        assert_eq!(data("a1B2"), SequenceData::Hex("a1B2".into()));
        assert_eq!(data("de ad\tbe ef"), SequenceData::Hex("deadbeef".into()));
    }

    #[test]
    fn odd_hex_is_rejected() {
        assert_eq!(classify("a1b"), Err(EncodingError::OddHexLength(3)));
    }

    #[test]
    fn everything_else_is_base64() {
        assert_eq!(data("QUJD"), SequenceData::Base64("QUJD".into()));
        assert_eq!(data("SGVs bG8=\n"), SequenceData::Base64("SGVsbG8=".into()));
    }

    #[test]
    fn empty_input_is_unrecognized() {
        assert_eq!(classify(""), Err(EncodingError::UnrecognizedFormat));
        assert_eq!(classify(" \n\t "), Err(EncodingError::UnrecognizedFormat));
    }

    #[test]
    fn payload_serializes_single_field_and_cap() {
        let payload = classify("1 2 3").unwrap().with_limit_bits(Some(24));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({"data_numbers": [1, 2, 3], "limit_bits": 24})
        );

        let payload = classify("0110").unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({"data_bits": "0110"})
        );
    }
}

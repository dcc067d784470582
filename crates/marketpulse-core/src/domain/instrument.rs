use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const CODE_LEN: usize = 6;

/// Instrument class carried by the reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Stock,
    Fund,
}

impl InstrumentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Fund => "fund",
        }
    }
}

impl FromStr for InstrumentKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(Self::Stock),
            "fund" | "etf" => Ok(Self::Fund),
            _ => Err(ValidationError::InvalidKind {
                value: value.to_owned(),
            }),
        }
    }
}

/// Listing venue, rendered as the instrument id suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExchangeSuffix {
    Sh,
    Sz,
    Bj,
}

impl ExchangeSuffix {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sh => "SH",
            Self::Sz => "SZ",
            Self::Bj => "BJ",
        }
    }

    /// Infer the venue from a bare code using the exchange numbering ranges.
    pub fn infer(code: &str) -> Option<Self> {
        match code.as_bytes().first()? {
            b'5' | b'6' | b'9' => Some(Self::Sh),
            b'0' | b'1' | b'2' | b'3' => Some(Self::Sz),
            b'4' | b'8' => Some(Self::Bj),
            _ => None,
        }
    }
}

impl Display for ExchangeSuffix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeSuffix {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SH" | "SSE" => Ok(Self::Sh),
            "SZ" | "SZSE" => Ok(Self::Sz),
            "BJ" | "BSE" => Ok(Self::Bj),
            _ => Err(ValidationError::InvalidExchange {
                value: value.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for ExchangeSuffix {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExchangeSuffix> for String {
    fn from(value: ExchangeSuffix) -> Self {
        value.as_str().to_owned()
    }
}

/// Immutable tradable instrument reference.
///
/// `id` is `<display_code>.<exchange_suffix>` and is the key every other
/// component uses for the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub display_code: String,
    pub kind: InstrumentKind,
    pub exchange_suffix: ExchangeSuffix,
}

impl Instrument {
    pub fn new(
        code: &str,
        kind: InstrumentKind,
        exchange_suffix: ExchangeSuffix,
    ) -> Result<Self, ValidationError> {
        let code = validate_code(code)?;
        Ok(Self {
            id: format!("{code}.{exchange_suffix}"),
            display_code: code,
            kind,
            exchange_suffix,
        })
    }

    pub fn stock(code: &str, exchange_suffix: ExchangeSuffix) -> Result<Self, ValidationError> {
        Self::new(code, InstrumentKind::Stock, exchange_suffix)
    }

    pub fn fund(code: &str, exchange_suffix: ExchangeSuffix) -> Result<Self, ValidationError> {
        Self::new(code, InstrumentKind::Fund, exchange_suffix)
    }

    /// Parse an instrument id such as `600000.SH`; the kind is inferred from the code.
    pub fn parse_id(value: &str) -> Result<Self, ValidationError> {
        let (code, suffix) =
            value
                .trim()
                .split_once('.')
                .ok_or_else(|| ValidationError::InvalidInstrumentId {
                    value: value.to_owned(),
                })?;
        let exchange_suffix = suffix.parse()?;
        let kind = if matches!(code.as_bytes().first(), Some(b'1' | b'5')) {
            InstrumentKind::Fund
        } else {
            InstrumentKind::Stock
        };
        Self::new(code, kind, exchange_suffix)
    }
}

impl Display for Instrument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

fn validate_code(input: &str) -> Result<String, ValidationError> {
    let code = input.trim();
    if code.is_empty() {
        return Err(ValidationError::EmptyCode);
    }
    if code.len() != CODE_LEN || !code.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::InvalidCode {
            code: code.to_owned(),
        });
    }
    Ok(code.to_owned())
}

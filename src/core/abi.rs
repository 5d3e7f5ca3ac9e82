//! Purpose: Contract ABI codec for the parameter kinds the ledger uses.
//! Exports: `Address`, `ParamType`, `Token`, call/tuple encode + decode, selectors, hex helpers.
//! Role: Pure byte-level layer under the JSON-RPC ledger client; no I/O.
//! Invariants: Encoding follows the head/tail layout (32-byte words, dynamic data after heads).
//! Invariants: Decoding never panics on short or hostile payloads; it returns `Decode` errors.
//! Invariants: Unsigned integers are held as `u64`; wider on-chain values are rejected.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::core::error::{Error, ErrorKind};

pub const WORD: usize = 32;

/// 20-byte account/contract address.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// All-zero address; the ledger uses it to mean "no borrower".
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let digits = strip_hex_prefix(trimmed).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("address must start with 0x: {trimmed}"))
        })?;
        if digits.len() != 40 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("address must be 40 hex digits: {trimmed}")));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("address is not valid hex: {trimmed}"))
                .with_source(err)
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamType {
    Uint,
    Address,
    String,
    Bool,
}

impl ParamType {
    /// Map a Solidity type name onto the supported kinds.
    pub fn from_solidity(name: &str) -> Option<Self> {
        match name.trim() {
            "uint256" | "uint" => Some(Self::Uint),
            "address" => Some(Self::Address),
            "string" => Some(Self::String),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    pub fn solidity_name(self) -> &'static str {
        match self {
            Self::Uint => "uint256",
            Self::Address => "address",
            Self::String => "string",
            Self::Bool => "bool",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Uint(u64),
    Address(Address),
    String(String),
    Bool(bool),
}

impl Token {
    pub fn into_uint(self) -> Option<u64> {
        match self {
            Token::Uint(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_address(self) -> Option<Address> {
        match self {
            Token::Address(address) => Some(address),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Token::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_bool(self) -> Option<bool> {
        match self {
            Token::Bool(flag) => Some(flag),
            _ => None,
        }
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// First four bytes of the Keccak-256 of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic-0 of an event with the given canonical signature.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Split `name(type,type)` into its name and parameter kinds.
pub fn parse_signature(signature: &str) -> Result<(String, Vec<ParamType>), Error> {
    let invalid = || {
        Error::new(ErrorKind::Usage).with_message(format!("invalid signature: {signature}"))
    };
    let open = signature.find('(').ok_or_else(invalid)?;
    let inner = signature[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
    let name = signature[..open].trim();
    if name.is_empty() {
        return Err(invalid());
    }
    let mut params = Vec::new();
    if !inner.trim().is_empty() {
        for part in inner.split(',') {
            let param = ParamType::from_solidity(part).ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("unsupported parameter type `{}` in {signature}", part.trim()))
            })?;
            params.push(param);
        }
    }
    Ok((name.to_string(), params))
}

pub fn encode_call(selector: [u8; 4], tokens: &[Token]) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend_from_slice(&encode_tokens(tokens));
    out
}

pub fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        match token {
            Token::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            Token::Address(address) => head.extend_from_slice(&address_word(address)),
            Token::Bool(flag) => head.extend_from_slice(&uint_word(u64::from(*flag))),
            Token::String(text) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
                tail.extend_from_slice(&uint_word(text.len() as u64));
                tail.extend_from_slice(text.as_bytes());
                pad_to_word(&mut tail);
            }
        }
    }
    head.extend_from_slice(&tail);
    head
}

pub fn decode_tokens(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::with_capacity(types.len());
    for (slot, kind) in types.iter().enumerate() {
        let word = read_word(data, slot * WORD)?;
        let token = match kind {
            ParamType::Uint => Token::Uint(word_to_u64(word)?),
            ParamType::Address => Token::Address(word_to_address(word)?),
            ParamType::Bool => Token::Bool(word_to_bool(word)?),
            ParamType::String => {
                let offset = word_to_usize(word)?;
                Token::String(read_string(data, offset)?)
            }
        };
        tokens.push(token);
    }
    Ok(tokens)
}

pub fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 20..].copy_from_slice(address.as_bytes());
    word
}

pub fn word_to_u64(word: &[u8; WORD]) -> Result<u64, Error> {
    if word[..WORD - 8].iter().any(|byte| *byte != 0) {
        return Err(decode_error("uint256 value exceeds 64 bits"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(bytes))
}

pub fn word_to_address(word: &[u8; WORD]) -> Result<Address, Error> {
    if word[..WORD - 20].iter().any(|byte| *byte != 0) {
        return Err(decode_error("address word has non-zero padding"));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[WORD - 20..]);
    Ok(Address::new(bytes))
}

fn word_to_bool(word: &[u8; WORD]) -> Result<bool, Error> {
    match word_to_u64(word)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(decode_error("bool word is neither 0 nor 1")),
    }
}

fn word_to_usize(word: &[u8; WORD]) -> Result<usize, Error> {
    let value = word_to_u64(word)?;
    usize::try_from(value).map_err(|_| decode_error("offset exceeds platform limits"))
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8; WORD], Error> {
    offset
        .checked_add(WORD)
        .and_then(|end| data.get(offset..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| decode_error("abi payload is truncated"))
}

fn read_string(data: &[u8], offset: usize) -> Result<String, Error> {
    let len = word_to_usize(read_word(data, offset)?)?;
    let start = offset + WORD;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| decode_error("abi string runs past the payload"))?;
    String::from_utf8(bytes.to_vec()).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("abi string is not valid utf-8")
            .with_source(err)
    })
}

fn pad_to_word(buf: &mut Vec<u8>) {
    let rem = buf.len() % WORD;
    if rem != 0 {
        buf.resize(buf.len() + WORD - rem, 0);
    }
}

fn decode_error(message: &str) -> Error {
    Error::new(ErrorKind::Decode).with_message(message)
}

fn strip_hex_prefix(text: &str) -> Option<&str> {
    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, Error> {
    let digits = strip_hex_prefix(text)
        .ok_or_else(|| decode_error("hex data must start with 0x"))?;
    hex::decode(digits).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid hex data")
            .with_source(err)
    })
}

/// JSON-RPC quantity encoding (`0x` + minimal hex digits).
pub fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

pub fn parse_quantity(text: &str) -> Result<u64, Error> {
    let digits = strip_hex_prefix(text)
        .filter(|digits| !digits.is_empty())
        .ok_or_else(|| decode_error("quantity must be 0x-prefixed hex"))?;
    u64::from_str_radix(digits, 16).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message(format!("invalid quantity: {text}"))
            .with_source(err)
    })
}

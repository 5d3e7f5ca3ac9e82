//! Purpose: Ledger contract client over JSON-RPC (`eth_call`, `eth_sendTransaction`, logs).
//! Exports: `LedgerAbi`, `LedgerConfig`, `RpcLedger`, default endpoint/address constants.
//! Role: Implements `Ledger` for a deployed contract reached through the provider bridge.
//! Invariants: Every contract entry point is addressed by a validated signature from `LedgerAbi`.
//! Invariants: An empty `eth_call` result for a record slot means the slot is vacant.
//! Invariants: A record or log payload that fails to decode is logged and treated as absent.
#![allow(clippy::result_large_err)]

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::warn;

use super::rpc::RpcClient;
use crate::core::abi::{
    self, Address, ParamType, Token, decode_hex, decode_tokens, encode_call, encode_hex,
    event_topic, parse_quantity, parse_signature, quantity, selector,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::ledger::{EventBatch, Ledger, LedgerEvent, LedgerResult, TxHash};
use crate::core::record::Record;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_LEDGER_ADDRESS: &str = "0x5237b78c44e113cb77515e5c3d678b4d52ef98f4";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const RECORD_OUTPUTS: [ParamType; 4] = [
    ParamType::Uint,
    ParamType::String,
    ParamType::Address,
    ParamType::Bool,
];

/// Canonical signatures of the ledger entry points this crate calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerAbi {
    pub count: String,
    pub record: String,
    pub add: String,
    pub borrow: String,
    pub return_book: String,
    pub borrowed_event: String,
    pub returned_event: String,
}

struct Entry {
    field: &'static str,
    name: &'static str,
    kind: &'static str,
    inputs: &'static [ParamType],
}

const ENTRIES: [Entry; 7] = [
    Entry {
        field: "count",
        name: "getBookCount",
        kind: "function",
        inputs: &[],
    },
    Entry {
        field: "record",
        name: "books",
        kind: "function",
        inputs: &[ParamType::Uint],
    },
    Entry {
        field: "add",
        name: "addBook",
        kind: "function",
        inputs: &[ParamType::Uint, ParamType::String],
    },
    Entry {
        field: "borrow",
        name: "borrowBook",
        kind: "function",
        inputs: &[ParamType::Uint, ParamType::Address],
    },
    Entry {
        field: "return_book",
        name: "returnBook",
        kind: "function",
        inputs: &[ParamType::Uint],
    },
    Entry {
        field: "borrowed_event",
        name: "BookBorrowed",
        kind: "event",
        inputs: &[ParamType::Uint, ParamType::Address],
    },
    Entry {
        field: "returned_event",
        name: "BookReturned",
        kind: "event",
        inputs: &[ParamType::Uint],
    },
];

impl Default for LedgerAbi {
    fn default() -> Self {
        Self {
            count: "getBookCount()".to_string(),
            record: "books(uint256)".to_string(),
            add: "addBook(uint256,string)".to_string(),
            borrow: "borrowBook(uint256,address)".to_string(),
            return_book: "returnBook(uint256)".to_string(),
            borrowed_event: "BookBorrowed(uint256,address)".to_string(),
            returned_event: "BookReturned(uint256)".to_string(),
        }
    }
}

impl LedgerAbi {
    /// Build from a JSON ABI document (a bare entry array or an artifact with an `abi` key).
    pub fn from_json(document: &Value) -> Result<Self, Error> {
        let entries = document
            .as_array()
            .or_else(|| document.get("abi").and_then(Value::as_array))
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("abi document must be an array or contain an `abi` array")
            })?;

        let mut abi = Self::default();
        for entry in &ENTRIES {
            let signature = find_signature(entries, entry)?;
            *abi.field_mut(entry.field) = signature;
        }
        if let Some(outputs) = find_outputs(entries, "books") {
            if outputs != RECORD_OUTPUTS {
                return Err(Error::new(ErrorKind::Usage).with_message(
                    "abi entry `books` must return (uint256,string,address,bool)",
                ));
            }
        }
        abi.validate()?;
        Ok(abi)
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("failed to read abi file {}", path.display()))
                .with_source(err)
        })?;
        let document: Value = serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("abi file {} is not valid json", path.display()))
                .with_source(err)
        })?;
        Self::from_json(&document)
    }

    /// Check that every signature parses and carries the parameter kinds the client encodes.
    pub fn validate(&self) -> Result<(), Error> {
        for entry in &ENTRIES {
            let signature = self.field(entry.field);
            let (_, params) = parse_signature(signature)?;
            if params != entry.inputs {
                return Err(Error::new(ErrorKind::Usage).with_message(format!(
                    "signature `{signature}` does not match the expected {} parameters",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    fn field(&self, field: &str) -> &str {
        match field {
            "count" => &self.count,
            "record" => &self.record,
            "add" => &self.add,
            "borrow" => &self.borrow,
            "return_book" => &self.return_book,
            "borrowed_event" => &self.borrowed_event,
            _ => &self.returned_event,
        }
    }

    fn field_mut(&mut self, field: &str) -> &mut String {
        match field {
            "count" => &mut self.count,
            "record" => &mut self.record,
            "add" => &mut self.add,
            "borrow" => &mut self.borrow,
            "return_book" => &mut self.return_book,
            "borrowed_event" => &mut self.borrowed_event,
            _ => &mut self.returned_event,
        }
    }
}

fn find_signature(entries: &[Value], entry: &Entry) -> Result<String, Error> {
    let found = entries
        .iter()
        .find(|value| {
            value.get("name").and_then(Value::as_str) == Some(entry.name)
                && value.get("type").and_then(Value::as_str) == Some(entry.kind)
        })
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("abi is missing {} `{}`", entry.kind, entry.name))
        })?;
    let inputs = param_list(found.get("inputs")).ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("abi entry `{}` has unsupported input types", entry.name))
    })?;
    let names: Vec<&str> = inputs.iter().map(|param| param.solidity_name()).collect();
    Ok(format!("{}({})", entry.name, names.join(",")))
}

fn find_outputs(entries: &[Value], name: &str) -> Option<Vec<ParamType>> {
    entries
        .iter()
        .find(|value| value.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|value| param_list(value.get("outputs")))
}

fn param_list(params: Option<&Value>) -> Option<Vec<ParamType>> {
    let Some(params) = params else {
        return Some(Vec::new());
    };
    params
        .as_array()?
        .iter()
        .map(|param| {
            param
                .get("type")
                .and_then(Value::as_str)
                .and_then(ParamType::from_solidity)
        })
        .collect()
}

/// Everything needed to reach the ledger, fixed once at startup.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub address: Address,
    pub abi: LedgerAbi,
    /// Acting account override; defaults to the provider's first account.
    pub from: Option<Address>,
    pub timeout: Duration,
}

impl LedgerConfig {
    pub fn new(rpc_url: impl Into<String>, address: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            address,
            abi: LedgerAbi::default(),
            from: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_abi(mut self, abi: LedgerAbi) -> Self {
        self.abi = abi;
        self
    }

    pub fn with_from(mut self, from: Option<Address>) -> Self {
        self.from = from;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

struct Selectors {
    count: [u8; 4],
    record: [u8; 4],
    add: [u8; 4],
    borrow: [u8; 4],
    return_book: [u8; 4],
    borrowed_topic: [u8; 32],
    returned_topic: [u8; 32],
}

impl Selectors {
    fn from_abi(abi: &LedgerAbi) -> Self {
        Self {
            count: selector(&abi.count),
            record: selector(&abi.record),
            add: selector(&abi.add),
            borrow: selector(&abi.borrow),
            return_book: selector(&abi.return_book),
            borrowed_topic: event_topic(&abi.borrowed_event),
            returned_topic: event_topic(&abi.returned_event),
        }
    }
}

pub struct RpcLedger {
    rpc: RpcClient,
    address: Address,
    selectors: Selectors,
}

impl RpcLedger {
    pub fn new(rpc: RpcClient, address: Address, abi: &LedgerAbi) -> Self {
        Self {
            rpc,
            address,
            selectors: Selectors::from_abi(abi),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, Error> {
        config.abi.validate()?;
        let rpc = RpcClient::new(config.rpc_url.clone())?.with_timeout(config.timeout);
        Ok(Self::new(rpc, config.address, &config.abi))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    fn call(&self, data: Vec<u8>) -> LedgerResult<Vec<u8>> {
        let request = json!({
            "to": self.address,
            "data": encode_hex(&data),
        });
        let result: String = self.rpc.call("eth_call", json!([request, "latest"]))?;
        decode_hex(&result).map_err(|err| err.with_method("eth_call"))
    }

    fn send(&self, from: Address, data: Vec<u8>) -> LedgerResult<TxHash> {
        let request = json!({
            "from": from,
            "to": self.address,
            "data": encode_hex(&data),
        });
        let hash: String = self.rpc.call("eth_sendTransaction", json!([request]))?;
        Ok(TxHash(hash))
    }

    fn decode_logs(&self, logs: &[RawLog]) -> Vec<LedgerEvent> {
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match self.decode_log(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => warn!(
                    block = log.block_number.as_deref().unwrap_or("?"),
                    topics = ?log.topics,
                    error = %err,
                    "skipping undecodable ledger log"
                ),
            }
        }
        events
    }

    fn decode_log(&self, log: &RawLog) -> LedgerResult<Option<LedgerEvent>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let topic0 = decode_hex(topic0)?;
        // Indexed params lead in both events, so topics[1..] followed by data words
        // yields the inputs in declaration order.
        let mut words = Vec::new();
        for topic in &log.topics[1..] {
            words.push(decode_hex(topic)?);
        }
        let data = decode_hex(&log.data)?;
        words.extend(data.chunks(abi::WORD).map(<[u8]>::to_vec));

        let word = |index: usize| -> LedgerResult<[u8; abi::WORD]> {
            words
                .get(index)
                .and_then(|word| <[u8; abi::WORD]>::try_from(word.as_slice()).ok())
                .ok_or_else(|| {
                    Error::new(ErrorKind::Decode)
                        .with_message("event log is missing a parameter")
                        .with_method("eth_getLogs")
                })
        };

        if topic0 == self.selectors.borrowed_topic {
            let uid = abi::word_to_u64(&word(0)?)?;
            let borrower = abi::word_to_address(&word(1)?)?;
            Ok(Some(LedgerEvent::Borrowed { uid, borrower }))
        } else if topic0 == self.selectors.returned_topic {
            let uid = abi::word_to_u64(&word(0)?)?;
            Ok(Some(LedgerEvent::Returned { uid }))
        } else {
            Ok(None)
        }
    }
}

#[derive(serde::Deserialize)]
struct RawLog {
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default = "empty_hex")]
    data: String,
    #[serde(default, rename = "blockNumber")]
    block_number: Option<String>,
}

fn empty_hex() -> String {
    "0x".to_string()
}

impl Ledger for RpcLedger {
    fn chain_id(&self) -> LedgerResult<u64> {
        let value: String = self.rpc.call("eth_chainId", json!([]))?;
        parse_quantity(&value).map_err(|err| err.with_method("eth_chainId"))
    }

    fn accounts(&self) -> LedgerResult<Vec<Address>> {
        let values: Vec<String> = self.rpc.call("eth_accounts", json!([]))?;
        values
            .iter()
            .map(|value| {
                value.parse::<Address>().map_err(|err| {
                    Error::new(ErrorKind::Decode)
                        .with_message(format!("provider returned an invalid account: {value}"))
                        .with_method("eth_accounts")
                        .with_source(err)
                })
            })
            .collect()
    }

    fn book_count(&self) -> LedgerResult<u64> {
        let data = self.call(encode_call(self.selectors.count, &[]))?;
        if data.is_empty() {
            return Err(Error::new(ErrorKind::Decode)
                .with_message("ledger returned no data for the book count")
                .with_method("eth_call")
                .with_hint("Check that --ledger points at a deployed ledger on this chain."));
        }
        let mut tokens = decode_tokens(&[ParamType::Uint], &data)?;
        tokens
            .pop()
            .and_then(Token::into_uint)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("count token missing"))
    }

    fn book(&self, index: u64) -> LedgerResult<Record> {
        let data = self.call(encode_call(self.selectors.record, &[Token::Uint(index)]))?;
        if data.is_empty() {
            return Ok(Record::vacant());
        }
        match decode_record(&data) {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(index, error = %err, "undecodable book record");
                Ok(Record::vacant())
            }
        }
    }

    fn add_book(&self, from: Address, uid: u64, title: &str) -> LedgerResult<TxHash> {
        let data = encode_call(
            self.selectors.add,
            &[Token::Uint(uid), Token::String(title.to_string())],
        );
        self.send(from, data)
    }

    fn borrow_book(&self, from: Address, uid: u64, borrower: Address) -> LedgerResult<TxHash> {
        let data = encode_call(
            self.selectors.borrow,
            &[Token::Uint(uid), Token::Address(borrower)],
        );
        self.send(from, data)
    }

    fn return_book(&self, from: Address, uid: u64) -> LedgerResult<TxHash> {
        let data = encode_call(self.selectors.return_book, &[Token::Uint(uid)]);
        self.send(from, data)
    }

    fn events_since(&self, cursor: Option<u64>) -> LedgerResult<EventBatch> {
        let head: String = self.rpc.call("eth_blockNumber", json!([]))?;
        let head = parse_quantity(&head).map_err(|err| err.with_method("eth_blockNumber"))?;
        let from = match cursor {
            Some(from) if from <= head => from,
            Some(from) => {
                return Ok(EventBatch {
                    events: Vec::new(),
                    next: from,
                });
            }
            None => {
                return Ok(EventBatch {
                    events: Vec::new(),
                    next: head + 1,
                });
            }
        };

        let filter = json!({
            "address": self.address,
            "fromBlock": quantity(from),
            "toBlock": quantity(head),
            "topics": [[
                encode_hex(&self.selectors.borrowed_topic),
                encode_hex(&self.selectors.returned_topic),
            ]],
        });
        let logs: Vec<RawLog> = self.rpc.call("eth_getLogs", json!([filter]))?;
        Ok(EventBatch {
            events: self.decode_logs(&logs),
            next: head + 1,
        })
    }
}

fn decode_record(data: &[u8]) -> LedgerResult<Record> {
    let mut tokens = decode_tokens(&RECORD_OUTPUTS, data)?.into_iter();
    let (Some(uid), Some(title), Some(borrower), Some(is_available)) = (
        tokens.next().and_then(Token::into_uint),
        tokens.next().and_then(Token::into_string),
        tokens.next().and_then(Token::into_address),
        tokens.next().and_then(Token::into_bool),
    ) else {
        return Err(Error::new(ErrorKind::Decode).with_message("record tokens missing"));
    };
    Ok(Record {
        uid: Some(uid),
        title,
        borrower,
        is_available,
    })
}

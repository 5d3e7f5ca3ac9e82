// Fake JSON-RPC node backed by `MemoryLedger`, speaking the ledger ABI over loopback HTTP.
#![allow(dead_code)]

use std::future::IntoFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use bookledger::api::{Address, Error, Ledger, MemoryLedger};
use bookledger::core::abi::{
    ParamType, Token, address_word, decode_hex, decode_tokens, encode_hex, encode_tokens,
    event_topic, quantity, selector, uint_word,
};

pub struct FakeNode {
    url: String,
    ledger: Arc<MemoryLedger>,
    requests: Arc<AtomicUsize>,
    raw_slots: RawSlots,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

#[derive(Clone)]
struct NodeState {
    ledger: Arc<MemoryLedger>,
    requests: Arc<AtomicUsize>,
    raw_slots: RawSlots,
}

// Hex payloads served for `books(index)` in place of the ledger's record.
type RawSlots = Arc<Mutex<HashMap<u64, String>>>;

impl FakeNode {
    pub fn start() -> Self {
        Self::with_ledger(Arc::new(MemoryLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<MemoryLedger>) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));
        let raw_slots = RawSlots::default();
        let state = NodeState {
            ledger: Arc::clone(&ledger),
            requests: Arc::clone(&requests),
            raw_slots: Arc::clone(&raw_slots),
        };
        let (addr_tx, addr_rx) = std::sync::mpsc::channel::<SocketAddr>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let thread = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind");
                addr_tx
                    .send(listener.local_addr().expect("addr"))
                    .expect("send addr");
                let app = Router::new().route("/", post(handle)).with_state(state);
                tokio::select! {
                    _ = axum::serve(listener, app).into_future() => {}
                    _ = shutdown_rx => {}
                }
            });
        });
        let addr = addr_rx.recv().expect("fake node address");
        Self {
            url: format!("http://{addr}/"),
            ledger,
            requests,
            raw_slots,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    pub fn account(&self) -> Address {
        self.ledger.accounts().expect("accounts")[0]
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Serve `data` verbatim for record slot `index`.
    pub fn override_slot(&self, index: u64, data: &[u8]) {
        self.raw_slots
            .lock()
            .expect("raw slots")
            .insert(index, encode_hex(data));
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn handle(State(state): State<NodeState>, Json(request): Json<Value>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let response = match dispatch(&state, &method, &params) {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }),
    };
    Json(response)
}

type RpcOutcome = Result<Value, (i64, String)>;

fn dispatch(state: &NodeState, method: &str, params: &Value) -> RpcOutcome {
    let ledger = state.ledger.as_ref();
    match method {
        "eth_chainId" => Ok(json!(quantity(ledger.chain_id().map_err(rpc_error)?))),
        "eth_accounts" => Ok(json!(ledger.accounts().map_err(rpc_error)?)),
        "eth_blockNumber" => Ok(json!(quantity(head(ledger)?))),
        "eth_call" => eth_call(ledger, &state.raw_slots, &params[0]),
        "eth_sendTransaction" => eth_send(ledger, &params[0]),
        "eth_getLogs" => eth_get_logs(ledger, &params[0]),
        other => Err((-32601, format!("method not found: {other}"))),
    }
}

fn head(ledger: &MemoryLedger) -> Result<u64, (i64, String)> {
    let batch = ledger.events_since(None).map_err(rpc_error)?;
    Ok(batch.next - 1)
}

fn call_data(request: &Value) -> Result<([u8; 4], Vec<u8>), (i64, String)> {
    let data = request["data"].as_str().unwrap_or("0x");
    let bytes = decode_hex(data).map_err(|err| (-32602, err.to_string()))?;
    if bytes.len() < 4 {
        return Err((-32602, "call data too short".to_string()));
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&bytes[..4]);
    Ok((sel, bytes[4..].to_vec()))
}

fn args(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, (i64, String)> {
    decode_tokens(types, data).map_err(|err| (-32602, err.to_string()))
}

fn eth_call(ledger: &MemoryLedger, raw_slots: &RawSlots, request: &Value) -> RpcOutcome {
    let (sel, data) = call_data(request)?;
    if sel == selector("getBookCount()") {
        let count = ledger.book_count().map_err(rpc_error)?;
        return Ok(json!(encode_hex(&encode_tokens(&[Token::Uint(count)]))));
    }
    if sel == selector("books(uint256)") {
        let index = args(&[ParamType::Uint], &data)?
            .pop()
            .and_then(Token::into_uint)
            .unwrap_or_default();
        if let Some(raw) = raw_slots.lock().expect("raw slots").get(&index) {
            return Ok(json!(raw));
        }
        let record = ledger.book(index).map_err(rpc_error)?;
        let Some(uid) = record.uid else {
            return Ok(json!("0x"));
        };
        let encoded = encode_tokens(&[
            Token::Uint(uid),
            Token::String(record.title),
            Token::Address(record.borrower),
            Token::Bool(record.is_available),
        ]);
        return Ok(json!(encode_hex(&encoded)));
    }
    Err((3, "execution reverted: unknown selector".to_string()))
}

fn eth_send(ledger: &MemoryLedger, request: &Value) -> RpcOutcome {
    let from: Address = request["from"]
        .as_str()
        .unwrap_or_default()
        .parse()
        .map_err(|err: Error| (-32602, err.to_string()))?;
    let (sel, data) = call_data(request)?;
    let tx = if sel == selector("addBook(uint256,string)") {
        let mut tokens = args(&[ParamType::Uint, ParamType::String], &data)?.into_iter();
        let uid = tokens.next().and_then(Token::into_uint).unwrap_or_default();
        let title = tokens.next().and_then(Token::into_string).unwrap_or_default();
        ledger.add_book(from, uid, &title)
    } else if sel == selector("borrowBook(uint256,address)") {
        let mut tokens = args(&[ParamType::Uint, ParamType::Address], &data)?.into_iter();
        let uid = tokens.next().and_then(Token::into_uint).unwrap_or_default();
        let borrower = tokens
            .next()
            .and_then(Token::into_address)
            .unwrap_or(Address::ZERO);
        ledger.borrow_book(from, uid, borrower)
    } else if sel == selector("returnBook(uint256)") {
        let uid = args(&[ParamType::Uint], &data)?
            .pop()
            .and_then(Token::into_uint)
            .unwrap_or_default();
        ledger.return_book(from, uid)
    } else {
        return Err((3, "execution reverted: unknown selector".to_string()));
    };
    Ok(json!(tx.map_err(rpc_error)?))
}

fn eth_get_logs(ledger: &MemoryLedger, filter: &Value) -> RpcOutcome {
    let from_block = filter["fromBlock"]
        .as_str()
        .and_then(|value| u64::from_str_radix(value.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0);
    let batch = ledger.events_since(Some(from_block)).map_err(rpc_error)?;
    let logs = batch
        .events
        .iter()
        .map(|event| match event {
            bookledger::api::LedgerEvent::Borrowed { uid, borrower } => json!({
                "topics": [
                    encode_hex(&event_topic("BookBorrowed(uint256,address)")),
                    encode_hex(&uint_word(*uid)),
                ],
                "data": encode_hex(&address_word(borrower)),
            }),
            bookledger::api::LedgerEvent::Returned { uid } => json!({
                "topics": [encode_hex(&event_topic("BookReturned(uint256)"))],
                "data": encode_hex(&uint_word(*uid)),
            }),
        })
        .collect::<Vec<_>>();
    Ok(json!(logs))
}

fn rpc_error(err: Error) -> (i64, String) {
    let message = err.message().unwrap_or("error").to_string();
    let code = if message.starts_with("execution reverted") {
        3
    } else {
        -32000
    };
    (code, message)
}

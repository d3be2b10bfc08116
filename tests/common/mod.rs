#![allow(dead_code)]

//! Shared harness for the integration tests: seeded keypairs, a genesis builder, a
//! deterministic arithmetic VM standing in for the embedder's VM, and a minimal
//! blocking client speaking the frame protocol.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use log::LevelFilter;

use converge::cell::signed::SignedCell;
use converge::consensus::block::{codes, Transaction, TxResult};
use converge::consensus::state::{PeerStatus, State};
use converge::net::framing::{read_frame, write_frame, FrameError};
use converge::{
    AccountKey, Address, Cell, Context, Keypair, Message, MessageKind, Outcome, Stake, Vector, Vm,
};

static LOGGER_INIT: Once = Once::new();

/// Set up a logger that logs all messages at `level` and above.
pub fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

pub fn keypair(seed: u64) -> Arc<Keypair> {
    Arc::new(Keypair::from_seed(seed))
}

/// A genesis state granting each listed peer a stake and, optionally, an
/// advertised URL.
pub fn genesis(peers: &[(AccountKey, u64, Option<String>)]) -> State {
    State::new(
        Vector::empty().to_cell(),
        Vector::empty().to_cell(),
        peers
            .iter()
            .map(|(key, stake, url)| (*key, PeerStatus::new(Stake::new(*stake), url.clone())))
            .collect(),
    )
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn await_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// A deterministic stand-in for the embedder's VM: evaluates integer forms and
/// s-expressions of `+`, `-` and `*` over integers. The state is never modified,
/// which trivially satisfies determinism.
pub struct ArithVm;

impl Vm for ArithVm {
    fn execute(&self, _cx: &Context, state: &State, _address: Address, form: &Cell) -> Outcome {
        match eval(form) {
            Ok(value) => Outcome::ok(state.clone(), Cell::long(value)),
            Err(message) => Outcome::error(state.clone(), codes::EXCEPTION, Cell::string(message)),
        }
    }
}

fn eval(form: &Cell) -> Result<i64, String> {
    if let Ok(value) = form.as_long() {
        return Ok(value);
    }
    let source = form
        .as_string()
        .map_err(|_| "unsupported form".to_string())?;
    let tokens: Vec<String> = source
        .replace('(', " ( ")
        .replace(')', " ) ")
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    let mut position = 0;
    let value = eval_tokens(&tokens, &mut position)?;
    if position != tokens.len() {
        return Err("trailing tokens".to_string());
    }
    Ok(value)
}

fn eval_tokens(tokens: &[String], position: &mut usize) -> Result<i64, String> {
    let token = tokens
        .get(*position)
        .ok_or_else(|| "unexpected end of form".to_string())?;
    *position += 1;
    if token != "(" {
        return token.parse().map_err(|_| format!("bad token: {}", token));
    }
    let operator = tokens
        .get(*position)
        .ok_or_else(|| "missing operator".to_string())?
        .clone();
    *position += 1;
    let mut values = Vec::new();
    while tokens.get(*position).map(String::as_str) != Some(")") {
        values.push(eval_tokens(tokens, position)?);
    }
    *position += 1;
    match operator.as_str() {
        "+" => Ok(values.iter().sum()),
        "*" => Ok(values.iter().product()),
        "-" => match values.split_first() {
            Some((first, rest)) => Ok(rest.iter().fold(*first, |acc, v| acc - v)),
            None => Err("'-' needs at least one argument".to_string()),
        },
        _ => Err(format!("unknown operator: {}", operator)),
    }
}

/// Build a signed transaction cell invoking `form` as `address`.
pub fn signed_invoke(keypair: &Keypair, address: u64, sequence: i64, form: &str) -> Cell {
    let tx = Transaction::new(Address::new(address), sequence, Cell::string(form)).into_cell();
    SignedCell::sign(keypair, tx).into_cell()
}

/// A minimal blocking client speaking the frame protocol over a `TcpStream`.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub fn connect(port: u16) -> Client {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("cannot connect to server");
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        Client { stream }
    }

    pub fn send(&mut self, message: &Message) {
        write_frame(&mut self.stream, message).expect("cannot write frame");
    }

    /// Send `message` after pushing every non-embedded cell reachable from its
    /// payload as DATA, so the server never needs to pull.
    pub fn send_with_novelty(&mut self, message: &Message) {
        let mut novelty = Vec::new();
        collect_novelty(&message.payload, &mut novelty);
        for cell in novelty {
            self.send(&Message::data(cell));
        }
        self.send(message);
    }

    /// Read one frame, or `None` on timeout.
    pub fn read(&mut self) -> Option<Message> {
        match read_frame(&mut self.stream) {
            Ok(message) => Some(message),
            Err(FrameError::Io(_)) => None,
            Err(FrameError::Bad(fault)) => panic!("bad frame from server: {}", fault),
        }
    }

    /// Read frames until one of `kind` arrives, skipping broadcasts.
    pub fn await_kind(&mut self, kind: MessageKind, timeout: Duration) -> Message {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(message) = self.read() {
                if message.kind == kind {
                    return message;
                }
            }
        }
        panic!("timed out waiting for a {:?} message", kind);
    }

    /// Read frames until the result correlated with `id` arrives.
    pub fn await_result(&mut self, id: i64, timeout: Duration) -> TxResult {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(message) = self.read() {
                if message.kind == MessageKind::Result {
                    let result = message.payload.as_result().expect("malformed result").clone();
                    if result.id() == id {
                        return result;
                    }
                }
            }
        }
        panic!("timed out waiting for result {}", id);
    }

    /// Submit a signed transaction under the given request id.
    pub fn transact(&mut self, id: i64, signed_tx: Cell) {
        let message = Message::transact(id, signed_tx).unwrap();
        self.send_with_novelty(&message);
    }

    pub fn query(&mut self, id: i64, form: &str, address: u64) {
        let message =
            Message::query(id, Cell::string(form), Cell::long(address as i64)).unwrap();
        self.send_with_novelty(&message);
    }

    pub fn status(&mut self, id: i64) {
        self.send(&Message::status(id));
    }
}

fn collect_novelty(cell: &Cell, out: &mut Vec<Cell>) {
    for child in cell.child_refs() {
        if let Some(child_cell) = child.cell() {
            collect_novelty(child_cell, out);
            if !child_cell.is_embedded()
                && !out.iter().any(|c| c.hash() == child_cell.hash())
            {
                out.push(child_cell.clone());
            }
        }
    }
}

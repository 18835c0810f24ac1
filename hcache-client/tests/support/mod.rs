#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Key that makes the fake store hang up instead of replying.
pub const HANGUP_KEY: &[u8] = b"__hangup__";

#[derive(Default)]
struct State {
    strings: HashMap<Vec<u8>, Vec<u8>>,
    hashes: HashMap<Vec<u8>, HashMap<Vec<u8>, Vec<u8>>>,
    log: Vec<Vec<Vec<u8>>>,
}

/// In-process RESP2 store answering SET/GET/HSET/HGETALL/EXPIRE/PING.
#[derive(Clone)]
pub struct FakeStore {
    pub addr: String,
    state: Arc<Mutex<State>>,
    commands: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
}

impl FakeStore {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let store = FakeStore {
            addr,
            state: Arc::new(Mutex::new(State::default())),
            commands: Arc::new(AtomicUsize::new(0)),
            accepted: Arc::new(AtomicUsize::new(0)),
        };

        let server = store.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                server.accepted.fetch_add(1, Ordering::SeqCst);
                let conn = server.clone();
                thread::spawn(move || conn.serve(stream));
            }
        });

        store
    }

    /// Number of commands received across all connections.
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// Number of TCP connections accepted.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Arguments of the most recent command, name included.
    pub fn last_command(&self) -> Option<Vec<Vec<u8>>> {
        self.state.lock().unwrap().log.last().cloned()
    }

    fn serve(&self, mut stream: TcpStream) {
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        loop {
            let args = match read_command(&mut reader) {
                Ok(Some(args)) => args,
                _ => return,
            };
            self.commands.fetch_add(1, Ordering::SeqCst);
            if args.get(1).map(Vec::as_slice) == Some(HANGUP_KEY) {
                return;
            }
            let reply = self.dispatch(args);
            if stream.write_all(&reply).is_err() {
                return;
            }
            let _ = stream.flush();
        }
    }

    fn dispatch(&self, args: Vec<Vec<u8>>) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        state.log.push(args.clone());
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match (name.as_str(), args.len()) {
            ("PING", 1) => simple("PONG"),
            ("SET", 3) => {
                state.hashes.remove(&args[1]);
                state.strings.insert(args[1].clone(), args[2].clone());
                simple("OK")
            }
            ("GET", 2) => {
                if state.hashes.contains_key(&args[1]) {
                    return error("WRONGTYPE Operation against a key holding the wrong kind of value");
                }
                match state.strings.get(&args[1]) {
                    Some(value) => bulk(value),
                    None => b"$-1\r\n".to_vec(),
                }
            }
            ("HSET", n) if n >= 4 && n % 2 == 0 => {
                let hash = state.hashes.entry(args[1].clone()).or_default();
                let mut added = 0;
                for pair in args[2..].chunks(2) {
                    if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                integer(added)
            }
            ("HGETALL", 2) => {
                let mut out = Vec::new();
                match state.hashes.get(&args[1]) {
                    Some(hash) => {
                        out.extend_from_slice(format!("*{}\r\n", hash.len() * 2).as_bytes());
                        for (field, value) in hash {
                            out.extend_from_slice(&bulk(field));
                            out.extend_from_slice(&bulk(value));
                        }
                    }
                    None => out.extend_from_slice(b"*0\r\n"),
                }
                out
            }
            ("EXPIRE", 3) => {
                let exists = state.strings.contains_key(&args[1]) || state.hashes.contains_key(&args[1]);
                integer(exists as i64)
            }
            _ => error("ERR wrong number of arguments"),
        }
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

fn simple(msg: &str) -> Vec<u8> {
    format!("+{msg}\r\n").into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Writer shared between a `tracing` subscriber and the test body.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Dispatcher that writes plain-text logs into the returned buffer.
pub fn capture_logs() -> (tracing::Dispatch, LogBuffer) {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    (tracing::Dispatch::new(subscriber), logs)
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use gree_climate::codec::{Envelope, decode, encode};
use gree_climate::{DeviceDescriptor, GENERIC_KEY, Key, SessionKey};
use serde_json::{Value, json};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub const DEVICE_ID: &str = "f4911e7aca59";
pub const DEVICE_KEY: &str = "St8Vw1Yz4Bc7Ef0H";
pub const FIRMWARE: &str = "362001000762+U-CS532AE(LT)V3.31.bin";

pub fn device_key() -> SessionKey {
    SessionKey::from_text(DEVICE_KEY).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Answer,
    Silent,
    Reject,
    /// Seal the reply with a key the client does not hold.
    WrongKey,
}

#[derive(Debug, Clone)]
pub struct Behavior {
    pub id: String,
    pub announce: bool,
    pub announce_twice: bool,
    /// Precede the announcement with a non-JSON datagram and a wrong-key `dev` envelope.
    pub announce_noise: bool,
    pub bind: Reply,
    pub status: Reply,
    pub command: Reply,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            id: DEVICE_ID.to_string(),
            announce: true,
            announce_twice: false,
            announce_noise: false,
            bind: Reply::Answer,
            status: Reply::Answer,
            command: Reply::Answer,
        }
    }
}

struct State {
    behavior: Behavior,
    values: HashMap<String, Value>,
    requests: Vec<String>,
}

/// Unit emulator on 127.0.0.1 speaking the scan/bind/status/cmd exchanges.
/// Properties it holds no value for are omitted from status replies.
pub struct FakeDevice {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start(behavior: Behavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let values = [
            ("Pow", json!(0)),
            ("Mod", json!(1)),
            ("SetTem", json!(24)),
            ("TemUn", json!(0)),
            ("TemRec", json!(0)),
            ("WdSpd", json!(0)),
            ("Lig", json!(1)),
            ("TemSen", json!(63)),
            ("hid", json!(FIRMWARE)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let state = Arc::new(Mutex::new(State {
            behavior,
            values,
            requests: Vec::new(),
        }));
        let task = tokio::spawn(serve(socket, state.clone()));
        Self { addr, state, task }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        let id = self.state.lock().unwrap().behavior.id.clone();
        DeviceDescriptor::new(self.addr, id)
    }

    pub fn set_behavior(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.state.lock().unwrap().behavior);
    }

    pub fn set(&self, code: &str, value: Value) {
        self.state.lock().unwrap().values.insert(code.to_string(), value);
    }

    pub fn remove(&self, code: &str) {
        self.state.lock().unwrap().values.remove(code);
    }

    pub fn value(&self, code: &str) -> Option<Value> {
        self.state.lock().unwrap().values.get(code).cloned()
    }

    /// Number of requests of message type `kind` received so far.
    pub fn requests(&self, kind: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|t| t.as_str() == kind)
            .count()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: UdpSocket, state: Arc<Mutex<State>>) {
    let device_key = *device_key().key();
    let mut buf = vec![0u8; 4096];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let replies = respond(&buf[..len], &state, &device_key);
        for reply in replies {
            let _ = socket.send_to(&reply, from).await;
        }
    }
}

fn respond(datagram: &[u8], state: &Mutex<State>, device_key: &Key) -> Vec<Vec<u8>> {
    let Ok(request) = serde_json::from_slice::<Value>(datagram) else {
        return Vec::new();
    };
    let mut state = state.lock().unwrap();
    let id = state.behavior.id.clone();

    if request["t"] == "scan" {
        state.requests.push("scan".to_string());
        if !state.behavior.announce {
            return Vec::new();
        }
        let info = json!({
            "t": "dev", "cid": id, "bc": "gree", "brand": "gree", "catalog": "gree",
            "mac": id, "mid": "10001", "model": "gree", "name": format!("fake {id}"),
            "series": "gree", "vender": "1", "ver": "V1.1.13", "lock": 0
        });
        let sealed = encode(&GENERIC_KEY, &info).with_generic_flag().with_client(id.as_str()).to_vec();
        let copies = if state.behavior.announce_twice { 2 } else { 1 };
        let mut replies = Vec::new();
        if state.behavior.announce_noise {
            replies.push(b"\x00\x17garbage".to_vec());
            let wrong_key = Key::new(*b"0000000000000000");
            let forged = json!({"t": "dev", "mac": "000000000000", "name": "forged"});
            replies.push(encode(&wrong_key, &forged).with_generic_flag().to_vec());
        }
        replies.extend(std::iter::repeat_n(sealed, copies));
        return replies;
    }

    let Ok(envelope) = Envelope::from_slice(datagram) else {
        return Vec::new();
    };
    let key = if envelope.uses_generic_key() { GENERIC_KEY } else { *device_key };
    let Ok(pack) = decode(&key, &envelope) else {
        return Vec::new();
    };
    let kind = pack["t"].as_str().unwrap_or_default().to_string();
    state.requests.push(kind.clone());

    let (reply, answer) = match kind.as_str() {
        "bind" => (
            state.behavior.bind,
            if state.behavior.bind == Reply::Reject {
                json!({"t": "bindok", "mac": id, "r": 403})
            } else {
                json!({"t": "bindok", "mac": id, "key": DEVICE_KEY, "r": 200})
            },
        ),
        "status" => {
            let (cols, dat): (Vec<String>, Vec<Value>) = pack["cols"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|c| c.as_str())
                .filter_map(|c| state.values.get(c).map(|v| (c.to_string(), v.clone())))
                .unzip();
            (
                state.behavior.status,
                json!({"t": "dat", "mac": id, "r": 200, "cols": cols, "dat": dat}),
            )
        }
        "cmd" => {
            let reply = state.behavior.command;
            if reply == Reply::Reject {
                (reply, json!({"t": "res", "mac": id, "r": 400, "opt": [], "p": [], "val": []}))
            } else {
                let opt = pack["opt"].clone();
                let p = pack["p"].clone();
                if reply == Reply::Answer
                    && let (Some(opt), Some(p)) = (opt.as_array(), p.as_array())
                {
                    for (code, value) in opt.iter().zip(p) {
                        if let Some(code) = code.as_str() {
                            state.values.insert(code.to_string(), value.clone());
                        }
                    }
                }
                (reply, json!({"t": "res", "mac": id, "r": 200, "opt": opt, "p": p, "val": p}))
            }
        }
        _ => return Vec::new(),
    };

    let seal_key = match reply {
        Reply::Silent => return Vec::new(),
        Reply::WrongKey => Key::new(*b"0000000000000000"),
        Reply::Answer | Reply::Reject => key,
    };
    let mut envelope = encode(&seal_key, &answer).with_client(id.as_str());
    if kind == "bind" {
        envelope = envelope.with_generic_flag();
    }
    vec![envelope.to_vec()]
}

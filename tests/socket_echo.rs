//! Black-box integration test exercising the full scheduler + event notifier
//! + socket stack together (spec.md §8 scenario 4 "Socket echo"), the way
//! `r3bl-org-r3bl-open-core`'s own `tests/` black-box suite drives its
//! public API end to end rather than reaching into internals.
//!
//! Two tasks share a loopback TCP pair: the sender writes "PING", the
//! receiver reads it and replies "PONG", and the sender reads the reply
//! back. Both tasks yield the kill sentinel once their half of the
//! exchange completes.
//!
//! A `Socket`'s `owner` must be the very `TaskHandle` that will be
//! re-signalled on its next readiness event, so each task here is built in
//! two steps: construct the task around a shared, initially-empty socket
//! slot, wrap it in its `TaskHandle`, then install the real socket (whose
//! `owner` is that same handle) into the slot.

use cf_core::config::PoolConfig;
use cf_core::socket::{IoOutcome, Socket};
use cf_core::task::pool::TaskPool;
use cf_core::task::{EventFlags, Task, TaskHandle, KILL};
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type SocketSlot = Arc<Mutex<Option<Socket>>>;

/// An "orphaned, re-signal me later" return outside the kill sentinel.
const WAIT_FOR_READINESS: i64 = i64::MIN + 1;

struct PingReceiver {
    socket: SocketSlot,
    saw_ping: Sender<()>,
}

impl Task for PingReceiver {
    fn run(&mut self) -> i64 {
        let mut socket_guard = self.socket.lock().unwrap();
        let socket = socket_guard.as_mut().expect("socket installed before first run");
        let mut buf = [0u8; 4];
        match socket.read(&mut buf).expect("read") {
            IoOutcome::Transferred(4) => {
                assert_eq!(&buf, b"PING");
                socket.write(b"PONG").expect("write PONG");
                let _ = self.saw_ping.send(());
                KILL
            }
            IoOutcome::WouldBlock => {
                socket.request_read_event().expect("re-arm read");
                WAIT_FOR_READINESS
            }
            other => panic!("unexpected receiver read outcome: {other:?}"),
        }
    }

    fn name(&self) -> &str {
        "echo-receiver"
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SenderState {
    AwaitingConnect,
    AwaitingPong,
}

struct PingSender {
    socket: SocketSlot,
    state: Mutex<SenderState>,
    saw_pong: Sender<String>,
}

impl Task for PingSender {
    fn run(&mut self) -> i64 {
        let mut state = self.state.lock().unwrap();
        let mut socket_guard = self.socket.lock().unwrap();
        let socket = socket_guard.as_mut().expect("socket installed before first run");

        match *state {
            SenderState::AwaitingConnect => match socket.write(b"PING") {
                Ok(IoOutcome::Transferred(4)) => {
                    *state = SenderState::AwaitingPong;
                    socket.request_read_event().expect("re-arm read");
                    WAIT_FOR_READINESS
                }
                Ok(IoOutcome::WouldBlock) => {
                    socket.request_write_event().expect("re-arm write");
                    WAIT_FOR_READINESS
                }
                other => panic!("unexpected sender write outcome: {other:?}"),
            },
            SenderState::AwaitingPong => {
                let mut buf = [0u8; 4];
                match socket.read(&mut buf).expect("read") {
                    IoOutcome::Transferred(4) => {
                        let _ = self.saw_pong.send(String::from_utf8_lossy(&buf).into_owned());
                        KILL
                    }
                    IoOutcome::WouldBlock => {
                        socket.request_read_event().expect("re-arm read");
                        WAIT_FOR_READINESS
                    }
                    other => panic!("unexpected sender read outcome: {other:?}"),
                }
            }
        }
    }

    fn name(&self) -> &str {
        "echo-sender"
    }
}

/// Owns a socket registration without ever being scheduled to run — used
/// only for the listening socket, which no readiness event is ever
/// requested against in this test (accept is polled directly).
struct Idle;
impl Task for Idle {
    fn run(&mut self) -> i64 {
        WAIT_FOR_READINESS
    }
}

#[test]
fn ping_pong_round_trip_over_loopback() {
    let pool = TaskPool::new(PoolConfig {
        worker_count: 2,
        ..PoolConfig::default()
    })
    .unwrap();

    let listener_owner = pool.spawn(Box::new(Idle));
    let mut listener = Socket::new(pool.clone(), listener_owner);
    listener.open().unwrap();
    listener.bind(Ipv4Addr::LOCALHOST, 0).unwrap();
    listener.listen(16).unwrap();
    let (_, port) = listener.local_addr().unwrap();

    let (saw_ping_tx, saw_ping_rx) = mpsc::channel();
    let (saw_pong_tx, saw_pong_rx) = mpsc::channel();

    let sender_slot: SocketSlot = Arc::new(Mutex::new(None));
    let sender_task = Arc::new(TaskHandle::new(Box::new(PingSender {
        socket: sender_slot.clone(),
        state: Mutex::new(SenderState::AwaitingConnect),
        saw_pong: saw_pong_tx,
    })));
    let mut client = Socket::new(pool.clone(), sender_task.clone());
    client.open().unwrap();
    client.connect(Ipv4Addr::LOCALHOST, port).unwrap();
    *sender_slot.lock().unwrap() = Some(client);
    pool.signal(&sender_task, EventFlags::USER_0);

    // Accept the peer connection once the kernel completes the handshake.
    let accepted_fd = loop {
        if let Some(fd) = listener.accept().unwrap() {
            break fd;
        }
        std::thread::sleep(Duration::from_millis(5));
    };

    let receiver_slot: SocketSlot = Arc::new(Mutex::new(None));
    let receiver_task = Arc::new(TaskHandle::new(Box::new(PingReceiver {
        socket: receiver_slot.clone(),
        saw_ping: saw_ping_tx,
    })));
    let server_side = Socket::from_accepted_fd(pool.clone(), receiver_task.clone(), accepted_fd);
    *receiver_slot.lock().unwrap() = Some(server_side);
    pool.signal(&receiver_task, EventFlags::USER_0);

    saw_ping_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("receiver never observed PING");
    let reply = saw_pong_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("sender never observed PONG");
    assert_eq!(reply, "PONG");

    pool.shutdown();
}

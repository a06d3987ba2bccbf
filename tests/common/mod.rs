//! Scripted in-memory transport for dispatcher tests.
#![allow(dead_code)] // each test crate uses a different subset of helpers

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cnc_link::{Connection, Result};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockState {
    responder: Responder,
    rx_queue: VecDeque<String>,
    written: Vec<String>,
    broken: bool,
}

/// Transport half handed to the [`cnc_link::Controller`].
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

/// Test-side control: inject unsolicited lines, sever the link, inspect the
/// wire log.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

/// Build a mock link whose `responder` maps each written command to the
/// reply lines the device would send back.
pub fn mock_link<F>(responder: F) -> (MockConnection, MockHandle)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let state = Arc::new(Mutex::new(MockState {
        responder: Box::new(responder),
        rx_queue: VecDeque::new(),
        written: Vec::new(),
        broken: false,
    }));
    (
        MockConnection {
            state: Arc::clone(&state),
        },
        MockHandle { state },
    )
}

/// A device that answers every command with a bare `ok`.
#[allow(dead_code)]
pub fn ack_everything() -> (MockConnection, MockHandle) {
    mock_link(|_| vec!["ok".to_string()])
}

impl MockHandle {
    /// Queue a line as if the device sent it on its own.
    pub fn inject_line(&self, line: &str) {
        self.state
            .lock()
            .unwrap()
            .rx_queue
            .push_back(line.to_string());
    }

    /// Make every subsequent read/write fail, as a dead cable would.
    pub fn sever(&self) {
        self.state.lock().unwrap().broken = true;
    }

    /// Commands written to the wire so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }
}

fn broken_pipe() -> cnc_link::CncError {
    std::io::Error::from(std::io::ErrorKind::BrokenPipe).into()
}

impl Connection for MockConnection {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(broken_pipe());
        }
        state.written.push(line.to_string());
        let replies = (state.responder)(line);
        state.rx_queue.extend(replies);
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(broken_pipe());
        }
        Ok(state.rx_queue.pop_front())
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().unwrap().broken
    }

    fn close(&mut self) {}
}

/// Poll `cond` until it holds or the deadline passes.
#[allow(dead_code)]
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    false
}

#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//! In-memory transport that records writes and plays scripted notifications

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oepl_ble::{Link, NotificationSink, Transport, TransportError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Delay before delivery, then the notification bytes
pub type Reply = (Duration, Vec<u8>);

/// Maps each written frame to the notifications the fake tag answers with
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Reply> + Send>;

const DATA_FRAME: [u8; 2] = [0x00, 0x71];

#[derive(Debug, Default)]
pub struct Log {
    pub events: Vec<String>,
    pub connects: usize,
    pub disconnects: usize,
    pub unsubscribes: usize,
    pub writes: Vec<Vec<u8>>,
    pub delivered: Vec<Vec<u8>>,
    /// Direct-write data frames written and not yet answered
    pub outstanding: usize,
    pub max_outstanding: usize,
}

impl Log {
    pub fn writes_with(&self, opcode: [u8; 2]) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|w| w.starts_with(&opcode))
            .cloned()
            .collect()
    }
}

#[derive(Clone)]
pub struct MockTransport {
    pub log: Arc<Mutex<Log>>,
    responder: Arc<Mutex<Responder>>,
    connect_errors: Arc<Mutex<VecDeque<TransportError>>>,
    has_characteristic: bool,
    resolve_delay: Option<Duration>,
}

impl MockTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<Reply> + Send + 'static) -> Self {
        Self {
            log: Arc::default(),
            responder: Arc::new(Mutex::new(Box::new(responder))),
            connect_errors: Arc::default(),
            has_characteristic: true,
            resolve_delay: None,
        }
    }

    /// A tag that never answers
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn without_characteristic(mut self) -> Self {
        self.has_characteristic = false;
        self
    }

    /// Take `delay` to look up the characteristic
    pub fn slow_resolve(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    /// Fail the next connect with `error`
    pub fn fail_connect(&self, error: TransportError) {
        self.connect_errors.lock().unwrap().push_back(error);
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn connect(&self, address: &str) -> Result<MockLink, TransportError> {
        {
            let mut log = self.log.lock().unwrap();
            log.connects += 1;
            log.events.push(format!("connect {address}"));
        }
        if let Some(error) = self.connect_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(MockLink {
            address: address.to_string(),
            log: Arc::clone(&self.log),
            responder: Arc::clone(&self.responder),
            has_characteristic: self.has_characteristic,
            resolve_delay: self.resolve_delay,
            queue: None,
        })
    }
}

pub struct MockLink {
    address: String,
    log: Arc<Mutex<Log>>,
    responder: Arc<Mutex<Responder>>,
    has_characteristic: bool,
    resolve_delay: Option<Duration>,
    queue: Option<mpsc::UnboundedSender<(Instant, Vec<u8>)>>,
}

#[async_trait]
impl Link for MockLink {
    async fn resolve_characteristic(&mut self, _uuid: Uuid) -> Result<bool, TransportError> {
        if let Some(delay) = self.resolve_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.has_characteristic)
    }

    async fn subscribe(&mut self, sink: NotificationSink) -> Result<(), TransportError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, Vec<u8>)>();
        let log = Arc::clone(&self.log);
        // One delivery task per link keeps replies in order.
        tokio::spawn(async move {
            while let Some((at, data)) = rx.recv().await {
                tokio::time::sleep_until(at).await;
                {
                    let mut log = log.lock().unwrap();
                    if data.starts_with(&DATA_FRAME) {
                        log.outstanding = log.outstanding.saturating_sub(1);
                    }
                    log.delivered.push(data.clone());
                }
                sink.push(data);
            }
        });
        self.queue = Some(tx);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        {
            let mut log = self.log.lock().unwrap();
            if data.starts_with(&DATA_FRAME) {
                log.outstanding += 1;
                log.max_outstanding = log.max_outstanding.max(log.outstanding);
            }
            log.writes.push(data.to_vec());
            log.events.push(format!("write {} {:02x?}", self.address, &data[..data.len().min(2)]));
        }
        let replies = {
            let mut responder = self.responder.lock().unwrap();
            (responder.as_mut())(data)
        };
        if let Some(queue) = &self.queue {
            let now = Instant::now();
            for (delay, reply) in replies {
                let _ = queue.send((now + delay, reply));
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.queue = None;
        let mut log = self.log.lock().unwrap();
        log.unsubscribes += 1;
        log.events.push(format!("unsubscribe {}", self.address));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.queue = None;
        let mut log = self.log.lock().unwrap();
        log.disconnects += 1;
        log.events.push(format!("disconnect {}", self.address));
        Ok(())
    }
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

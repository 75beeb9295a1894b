//! Trait abstraction for register reads to enable testing

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a single register read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response within the read timeout
    #[error("timed out waiting for the device")]
    Timeout,

    /// Corrupted or malformed response frame
    #[error("invalid response frame: {0}")]
    Crc(String),

    /// Device answered with a Modbus exception (NAK)
    #[error("device rejected the request: {0}")]
    Exception(String),

    /// The serial link is gone
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl TransportError {
    /// Whether retrying on the same link is pointless.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }
}

/// Trait for reading single holding registers from a device
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read one holding register
    async fn read_register(&mut self, address: u16) -> Result<u16, TransportError>;

    /// Close the link
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// Mock transport replaying scripted responses per register
    ///
    /// Scripted responses are consumed first; afterwards the register's
    /// steady value is returned, or `Timeout` if none was set.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        pub scripts: Arc<Mutex<HashMap<u16, VecDeque<Result<u16, TransportError>>>>>,
        pub values: Arc<Mutex<HashMap<u16, u16>>>,
        pub reads: Arc<Mutex<Vec<u16>>>,
        pub disconnected: Arc<Mutex<bool>>,
        pub cancel_after: Arc<Mutex<Option<(usize, CancellationToken)>>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_value(&self, register: u16, raw: u16) {
            self.values.lock().unwrap().insert(register, raw);
        }

        pub fn push_response(&self, register: u16, response: Result<u16, TransportError>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(register)
                .or_default()
                .push_back(response);
        }

        /// Cancel `token` once `reads` register reads have been served
        pub fn cancel_after(&self, reads: usize, token: CancellationToken) {
            *self.cancel_after.lock().unwrap() = Some((reads, token));
        }

        pub fn get_reads(&self) -> Vec<u16> {
            self.reads.lock().unwrap().clone()
        }

        pub fn is_disconnected(&self) -> bool {
            *self.disconnected.lock().unwrap()
        }
    }

    #[async_trait]
    impl RegisterTransport for ScriptedTransport {
        async fn read_register(&mut self, address: u16) -> Result<u16, TransportError> {
            let served = {
                let mut reads = self.reads.lock().unwrap();
                reads.push(address);
                reads.len()
            };

            if let Some((limit, token)) = self.cancel_after.lock().unwrap().as_ref() {
                if served >= *limit {
                    token.cancel();
                }
            }

            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&address)
                .and_then(VecDeque::pop_front);

            match scripted {
                Some(response) => response,
                None => self
                    .values
                    .lock()
                    .unwrap()
                    .get(&address)
                    .copied()
                    .ok_or(TransportError::Timeout),
            }
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            *self.disconnected.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scripted_then_steady() {
        let mut transport = ScriptedTransport::new();
        transport.set_value(0, 42);
        transport.push_response(0, Err(TransportError::Timeout));

        assert_eq!(transport.read_register(0).await, Err(TransportError::Timeout));
        assert_eq!(transport.read_register(0).await, Ok(42));
        assert_eq!(transport.read_register(0).await, Ok(42));
        assert_eq!(transport.read_register(5).await, Err(TransportError::Timeout));
        assert_eq!(transport.get_reads(), vec![0, 0, 0, 5]);
    }

    #[tokio::test]
    async fn test_cancel_after() {
        let mut transport = ScriptedTransport::new();
        let token = CancellationToken::new();
        transport.cancel_after(2, token.clone());

        let _ = transport.read_register(0).await;
        assert!(!token.is_cancelled());
        let _ = transport.read_register(0).await;
        assert!(token.is_cancelled());
    }
}

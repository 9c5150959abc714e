use crate::core::message::{DataMessage, DataMessageType};
use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&DataMessage) -> Result<()> + Send + Sync + 'static;

/// Routes data messages to per-kind handlers.
///
/// Handlers run on the receive path, so messages from one connection reach
/// them in the order they were sent.
#[derive(Clone)]
pub struct DataChannel {
    handlers: Arc<RwLock<HashMap<DataMessageType, Box<HandlerFn>>>>,
}

impl Default for DataChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DataChannel {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Install `handler` for `kind`, replacing any previous one.
    pub fn register<F>(&self, kind: DataMessageType, handler: F) -> Result<()>
    where
        F: Fn(&DataMessage) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    pub fn unregister(&self, kind: DataMessageType) -> Result<bool> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        Ok(handlers.remove(&kind).is_some())
    }

    /// Hand `msg` to its handler.
    ///
    /// Fails with [`ProtocolError::UnexpectedMessage`] when no handler is
    /// registered for its kind.
    pub fn dispatch(&self, msg: &DataMessage) -> Result<()> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        handlers
            .get(&msg.data_type)
            .ok_or(ProtocolError::UnexpectedMessage)
            .and_then(|handler| handler(msg))
    }
}

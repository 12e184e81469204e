use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::database::Database;
use crate::decode::DecodeLevel;
use crate::error::{Shutdown, UnitNotFound};
use crate::server::device_map::{lock, ServerHandlerMap};
use crate::server::task::ServerSetting;
use crate::tcp::server::ServerTask;
use crate::types::UnitId;

pub(crate) mod device_map;
mod dispatch;
pub(crate) mod handler;
mod periodic;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod task;
pub(crate) mod types;

// re-export to the public API
pub use device_map::DeviceMap;
pub use handler::{DefaultWriteHandler, WriteHandler, WriteMode, WriteResult};
pub use periodic::PeriodicUpdate;
pub use types::*;

/// A handle to the server async task. The task is shutdown when the handle is dropped,
/// along with all of its active sessions.
pub struct Server {
    tx: mpsc::Sender<ServerSetting>,
    handlers: ServerHandlerMap,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field(
                "units",
                &self.handlers.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Server {
    /// Run `callback` against the database of a device
    ///
    /// The device is locked for the duration of the callback, so requests for the same unit
    /// observe either none or all of its changes. Requests for other units are unaffected.
    ///
    /// If no device is registered for `unit_id`, the callback is never invoked.
    pub fn update<F, R>(&self, unit_id: UnitId, callback: F) -> Result<R, UnitNotFound>
    where
        F: FnOnce(&mut Database) -> R,
    {
        let endpoint = self
            .handlers
            .resolve(unit_id)
            .ok_or(UnitNotFound(unit_id))?;
        let mut guard = lock(endpoint);
        Ok(callback(&mut guard.database))
    }

    /// Spawn a task that runs `callback` against the database of a device every `period`
    ///
    /// Each invocation behaves exactly like [`Server::update`]. The first invocation happens
    /// one period after this call. Must be called from within the Tokio runtime.
    pub fn spawn_periodic_update<F>(
        &self,
        unit_id: UnitId,
        period: Duration,
        callback: F,
    ) -> Result<PeriodicUpdate, UnitNotFound>
    where
        F: FnMut(&mut Database) + Send + 'static,
    {
        let endpoint = self
            .handlers
            .resolve(unit_id)
            .ok_or(UnitNotFound(unit_id))?
            .clone();
        Ok(PeriodicUpdate::spawn(unit_id, endpoint, period, callback))
    }

    /// Change the decode level of the server and of every active session
    pub async fn set_decode_level(&mut self, level: DecodeLevel) -> Result<(), Shutdown> {
        self.tx
            .send(ServerSetting::ChangeDecoding(level))
            .await
            .map_err(|_| Shutdown)
    }

    /// Address the server is listening on
    ///
    /// Useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Spawns a TCP server task onto the runtime. This method can only
/// be called from within the runtime context.
///
/// Each incoming connection will spawn a new task to handle it.
///
/// * `max_sessions` - Maximum number of concurrent sessions, the oldest is closed when exceeded
/// * `addr` - A socket address to bound to
/// * `map` - The devices to serve, keyed by unit id
/// * `decode` - Decode log level
pub async fn spawn_tcp_server_task(
    max_sessions: usize,
    addr: SocketAddr,
    map: DeviceMap,
    decode: DecodeLevel,
) -> Result<Server, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let handlers = map.into_handler_map();

    let (tx, rx) = mpsc::channel(4);
    let mut task = ServerTask::new(max_sessions.max(1), listener, handlers.clone(), decode);
    tokio::spawn(
        async move { task.run(rx).await }
            .instrument(tracing::info_span!("Modbus-Server-TCP", "listen" = ?local_addr)),
    );

    Ok(Server {
        tx,
        handlers,
        local_addr,
    })
}

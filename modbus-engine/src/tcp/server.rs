use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::server::device_map::ServerHandlerMap;
use crate::server::task::{ServerSetting, SessionTask};

/// pause after a failed accept so that a persistent error does not spin the task
const ACCEPT_ERROR_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

struct SessionTracker {
    max: usize,
    id: u64,
    sessions: BTreeMap<u64, mpsc::Sender<ServerSetting>>,
}

type SessionTrackerWrapper = Arc<Mutex<SessionTracker>>;

fn lock(tracker: &SessionTrackerWrapper) -> MutexGuard<'_, SessionTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionTracker {
    fn new(max: usize) -> SessionTracker {
        Self {
            max,
            id: 0,
            sessions: BTreeMap::new(),
        }
    }

    fn get_next_id(&mut self) -> u64 {
        let ret = self.id;
        self.id += 1;
        ret
    }

    fn wrapped(max: usize) -> SessionTrackerWrapper {
        Arc::new(Mutex::new(Self::new(max)))
    }

    fn add(&mut self, sender: mpsc::Sender<ServerSetting>) -> u64 {
        if self.sessions.len() >= self.max {
            // ids are allocated in ascending order, so the first key is the oldest session
            if let Some(id) = self.sessions.keys().next().copied() {
                tracing::warn!("exceeded max connections, closing oldest session: {}", id);
                // dropping the only sender stops the session task
                self.sessions.remove(&id);
            }
        }

        let id = self.get_next_id();
        self.sessions.insert(id, sender);
        id
    }

    fn remove(&mut self, id: u64) {
        self.sessions.remove(&id);
    }

    fn clear(&mut self) {
        self.sessions.clear();
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Forward a setting to every session, returning how many sessions could not accept it
    fn broadcast(&self, setting: ServerSetting) -> usize {
        let mut dropped = 0;
        for (id, sender) in self.sessions.iter() {
            // a closed channel belongs to a session that is already exiting
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(setting) {
                tracing::warn!(
                    "session {} is not keeping up, dropped setting: {:?}",
                    id,
                    setting
                );
                dropped += 1;
            }
        }
        dropped
    }
}

pub(crate) struct ServerTask {
    listener: TcpListener,
    handlers: ServerHandlerMap,
    tracker: SessionTrackerWrapper,
    decode: DecodeLevel,
}

impl ServerTask {
    pub(crate) fn new(
        max_sessions: usize,
        listener: TcpListener,
        handlers: ServerHandlerMap,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            listener,
            handlers,
            tracker: SessionTracker::wrapped(max_sessions),
            decode,
        }
    }

    pub(crate) async fn run(&mut self, mut commands: mpsc::Receiver<ServerSetting>) {
        loop {
            tokio::select! {
               setting = commands.recv() => {
                    match setting {
                        Some(ServerSetting::ChangeDecoding(level)) => {
                            tracing::info!("changing decode level: {:?}", level);
                            self.decode = level;
                            lock(&self.tracker).broadcast(ServerSetting::ChangeDecoding(level));
                        }
                        None => {
                            tracing::info!("server shutdown");
                            // dropping the senders closes every session
                            lock(&self.tracker).clear();
                            return;
                        }
                    }
               }
               result = self.listener.accept() => {
                   match result {
                        Err(err) => {
                            tracing::error!("error accepting connection: {}", err);
                            tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                        }
                        Ok((socket, addr)) => {
                            self.handle(socket, addr)
                        }
                   }
               }
            }
        }
    }

    fn handle(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let phys = PhysLayer::new(socket);
        let decode = self.decode;
        let handlers = self.handlers.clone();
        let tracker = self.tracker.clone();
        let (tx, rx) = mpsc::channel(4);

        let (id, count) = {
            let mut guard = lock(&self.tracker);
            let id = guard.add(tx);
            (id, guard.len())
        };

        tracing::info!(
            "accepted connection {} from: {} (active sessions: {})",
            id,
            addr,
            count
        );

        tokio::spawn(async move {
            let session = async move {
                let err = SessionTask::new(phys, handlers, rx, decode).run().await;
                tracing::info!("session closed: {}", err);
            };
            session
                .instrument(tracing::info_span!("Session", "remote" = ?addr))
                .await;
            lock(&tracker).remove(id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_evicts_the_oldest_session() {
        let mut tracker = SessionTracker::new(2);
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let (tx3, _rx3) = mpsc::channel(1);

        assert_eq!(tracker.add(tx1), 0);
        assert_eq!(tracker.add(tx2), 1);
        assert_eq!(tracker.add(tx3), 2);

        assert_eq!(tracker.len(), 2);
        // the first session's sender was dropped
        assert_eq!(
            rx1.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        );
    }

    #[test]
    fn tracker_forwards_settings_to_every_session() {
        let mut tracker = SessionTracker::new(4);
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(1);
        tracker.add(tx1);
        let id = tracker.add(tx2);
        tracker.remove(id);

        let level = DecodeLevel::default().application(crate::decode::AppDecodeLevel::DataValues);
        tracker.broadcast(ServerSetting::ChangeDecoding(level));

        assert_eq!(rx1.try_recv(), Ok(ServerSetting::ChangeDecoding(level)));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn tracker_reports_sessions_with_full_queues() {
        let mut tracker = SessionTracker::new(4);
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(1);
        tracker.add(tx1);
        tracker.add(tx2);

        let first = ServerSetting::ChangeDecoding(DecodeLevel::nothing());
        let second = ServerSetting::ChangeDecoding(
            DecodeLevel::default().application(crate::decode::AppDecodeLevel::DataValues),
        );

        assert_eq!(tracker.broadcast(first), 0);
        // the second session consumes its queue, the first does not
        assert_eq!(rx2.try_recv(), Ok(first));
        assert_eq!(tracker.broadcast(second), 1);

        assert_eq!(rx1.try_recv(), Ok(first));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv(), Ok(second));
    }

    #[test]
    fn closed_sessions_are_not_reported() {
        let mut tracker = SessionTracker::new(4);
        let (tx, rx) = mpsc::channel(1);
        tracker.add(tx);
        drop(rx);
        let setting = ServerSetting::ChangeDecoding(DecodeLevel::nothing());
        assert_eq!(tracker.broadcast(setting), 0);
    }
}

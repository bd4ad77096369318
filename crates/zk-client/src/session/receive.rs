// Receive loop: one per connection generation.
use bytes::Bytes;
use std::sync::Weak;
use zk_transport::FrameReader;
use zk_wire::{KeeperState, Reply, WatchedEvent, xid};

use super::Shared;
use crate::config::Host;
use crate::error::Result;

/// Reads frames until the connection fails, then retires `generation`.
/// Exits quietly once the session itself is gone.
pub(super) async fn run(shared: Weak<Shared>, mut reader: FrameReader, generation: u64, host: Host) {
    tracing::debug!(generation, connection = reader.id().0, "receive loop started");
    loop {
        let frame = reader.read_frame().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let failure = match frame {
            Ok(Some(payload)) => match shared.route(payload, generation) {
                Ok(()) => continue,
                Err(err) => err,
            },
            Ok(None) => shared.classify(&host, "server closed the connection"),
            Err(err) => shared.connection_error(&host, &err),
        };
        shared.fail_generation(generation, failure, KeeperState::Disconnected);
        tracing::debug!(generation, "receive loop finished");
        return;
    }
}

impl Shared {
    fn route(&self, payload: Bytes, generation: u64) -> Result<()> {
        let reply = Reply::decode(payload)?;
        self.observe(&reply.header);
        match reply.header.xid {
            xid::NOTIFICATION => {
                let event = WatchedEvent::decode(&reply)?;
                tracing::debug!(path = %event.path, event_type = ?event.event_type, "notification");
                self.deliver(event);
            }
            xid::PING => self.resolve_pings(generation),
            request => match self
                .pending
                .remove_if(&request, |_, pending| pending.generation == generation)
            {
                Some((_, pending)) => {
                    let _ = pending.tx.send(Ok(reply));
                }
                None => tracing::debug!(xid = request, "reply for unknown request; ignoring"),
            },
        }
        Ok(())
    }
}

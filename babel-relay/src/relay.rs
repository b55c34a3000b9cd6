use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select, time,
};
use tracing::{info, warn};

use crate::{
    hub::{ConnectionId, HubHandle},
    message::InboundMessage,
    session::{self, SessionConfig},
};

/// How long `run_until` keeps the runtime alive after queueing the shutdown
/// notice, so write paths can flush it.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub struct Relay {
    listener: TcpListener,
    hub: HubHandle,
    session: SessionConfig,
    next_id: ConnectionId,
    shutdown_grace: Duration,
}

impl Relay {
    pub fn new(listener: TcpListener, hub: HubHandle, session: SessionConfig) -> Self {
        Self {
            listener,
            hub,
            session,
            next_id: 1,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&self.hub, self.shutdown_grace).await;
                    break;
                }
                accept_result = self.listener.accept() => {
                    self.handle_accept_result(accept_result);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    fn handle_accept_result(&mut self, result: std::io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, peer)) => {
                let id = self.next_id;
                self.next_id += 1;
                spawn_session(stream, peer, id, self.hub.clone(), self.session.clone());
            }
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }
}

async fn handle_shutdown(hub: &HubHandle, grace: Duration) {
    info!("relay shutting down");
    let notice = InboundMessage::announcement("The relay is shutting down.");
    if hub.broadcast(notice).await.is_err() {
        warn!("hub already stopped; shutdown notice not sent");
        return;
    }
    // A snapshot is answered only once the queued notice has been fanned out.
    if hub.snapshot().await.is_err() {
        warn!("hub stopped before the shutdown notice was dispatched");
        return;
    }
    time::sleep(grace).await;
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    hub: HubHandle,
    config: SessionConfig,
) {
    tokio::spawn(async move {
        if let Err(err) = session::run(stream, id, hub, config).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

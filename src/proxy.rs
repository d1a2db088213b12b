//! The TCP proxy server: accepts client connections, dials the origin,
//! and drives one relay engine per direction until either leg closes.

use crate::{
    auth::{PlayerProfile, SessionService},
    connection::ConnectionContext,
    packet::{Direction, PacketHandlers},
    relay::RelayEngine,
};
use ahash::AHashMap;
use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::Mutex,
};

const READ_CHUNK_SIZE: usize = 8192;

/// Listening proxy server. One instance serves many connections; each
/// accepted connection gets its own context and pair of relay engines.
pub struct ProxyServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

struct Shared {
    remote_host: String,
    remote_port: u16,
    handlers: Arc<PacketHandlers>,
    accounts: Arc<AHashMap<String, PlayerProfile>>,
    session: Arc<dyn SessionService>,
}

impl ProxyServer {
    pub async fn bind(
        bind_addr: impl Into<SocketAddr>,
        remote_host: String,
        remote_port: u16,
        handlers: PacketHandlers,
        accounts: AHashMap<String, PlayerProfile>,
        session: Arc<dyn SessionService>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr.into()).await?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                remote_host,
                remote_port,
                handlers: Arc::new(handlers),
                accounts: Arc::new(accounts),
                session,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves connections until the listener fails. Faults in
    /// one connection never affect the others.
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            "Relaying to {}:{}",
            self.shared.remote_host,
            self.shared.remote_port
        );
        loop {
            let (client, client_addr) = self.listener.accept().await?;
            tracing::info!("Accepted connection from {client_addr}");

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(err) = drive_connection(client, client_addr, shared).await {
                    tracing::info!("Connection lost: {err:?}");
                }
            });
        }
    }
}

/// Relays one proxied connection until either leg closes or errors.
async fn drive_connection(
    client: TcpStream,
    client_addr: SocketAddr,
    shared: Arc<Shared>,
) -> anyhow::Result<()> {
    client.set_nodelay(true)?;

    let server = TcpStream::connect((shared.remote_host.as_str(), shared.remote_port))
        .await
        .with_context(|| {
            format!(
                "failed to connect to the remote host {}:{}",
                shared.remote_host, shared.remote_port
            )
        })?;
    server.set_nodelay(true)?;

    let mut context = ConnectionContext::new(
        shared.remote_host.clone(),
        shared.remote_port,
        Arc::clone(&shared.accounts),
        Arc::clone(&shared.session),
    );
    context.set_client_address(client_addr.ip().to_string());
    let context = Arc::new(Mutex::new(context));

    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();

    let mut c2s = tokio::spawn(run_leg(
        RelayEngine::new(Direction::C2S, Arc::clone(&shared.handlers)),
        Arc::clone(&context),
        client_read,
        server_write,
    ));
    let mut s2c = tokio::spawn(run_leg(
        RelayEngine::new(Direction::S2C, Arc::clone(&shared.handlers)),
        context,
        server_read,
        client_write,
    ));

    // Whichever leg finishes first, the other is cancelled: closure
    // propagates and its buffers are dropped without interpretation.
    let first = tokio::select! {
        result = &mut c2s => {
            s2c.abort();
            result
        }
        result = &mut s2c => {
            c2s.abort();
            result
        }
    };

    match first {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Pumps one direction: reads raw chunks, runs them through the relay
/// engine under the shared context lock, and writes the produced bytes
/// to the peer. Returns on clean EOF; any error tears the connection
/// down.
async fn run_leg(
    mut engine: RelayEngine,
    context: Arc<Mutex<ConnectionContext>>,
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
) -> anyhow::Result<()> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let count = reader.read(&mut chunk).await?;
        if count == 0 {
            writer.shutdown().await.ok();
            return Ok(());
        }

        let out = {
            let mut context = context.lock().await;
            engine.receive(&mut context, &mut chunk[..count])?
        };
        if !out.is_empty() {
            writer.write_all(&out).await?;
        }
    }
}

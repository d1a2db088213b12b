use clap::Parser;
use minecraft_mitm_proxy::{
    auth::{self, DenyAllSessions},
    handlers,
    proxy::ProxyServer,
};
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

#[derive(Parser)]
struct Args {
    /// Host of the origin server to relay to.
    address: String,
    /// Port of the origin server.
    #[arg(default_value_t = 25565)]
    port: u16,
    /// Local port to listen on.
    #[arg(short, long, default_value_t = 25565)]
    bind_port: u16,
    /// JSON file mapping usernames to account profiles, used when the
    /// origin server requests encryption.
    #[arg(short, long, default_value = "accounts.json")]
    accounts_file: PathBuf,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let accounts = if args.accounts_file.exists() {
        auth::load_accounts(&args.accounts_file)?
    } else {
        Default::default()
    };

    let server = ProxyServer::bind(
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.bind_port)),
        args.address,
        args.port,
        handlers::default_handlers(),
        accounts,
        Arc::new(DenyAllSessions),
    )
    .await?;

    tracing::info!("Listening on port {}", args.bind_port);
    server.run().await
}

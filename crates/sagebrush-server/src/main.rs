//! Sagebrush session server
//!
//! Hosts tabletop combat sessions over renet. Each client connection gets an
//! inbound task that feeds the hub in arrival order; everything the hub sends
//! back is drained into renet once per tick.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use renet::{ClientId, ConnectionConfig, RenetServer, ServerEvent};
use sagebrush_core::{DiceRoller, SeededDice};
use sagebrush_protocol::{ConnectionId, Role};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sagebrush_server::{
    channel_for, channel_id, create_channel_configs, persistence, serialize_server_message,
    ClientMessage, Collaborators, ConnectionHub, Fixtures, HubConfig, InMemoryPrincipals,
    PersistenceHandle, RandomDice, RegistryConfig, ServerConfig, ServerMessage, ServerRunner,
    SessionRegistry, TransportConfig, PROTOCOL_ID,
};

#[derive(Parser, Debug)]
#[command(name = "sagebrush-server", about = "Authoritative tabletop session server")]
struct Cli {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// YAML fixtures for principals, characters and maps
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Directory for session records
    #[arg(long)]
    persistence_dir: Option<PathBuf>,

    /// Seed the dice for a reproducible table
    #[arg(long)]
    dice_seed: Option<u64>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Renet-side view of one connected client.
struct Client {
    connection: ConnectionId,
    inbound: mpsc::UnboundedSender<ClientMessage>,
    outbound: mpsc::UnboundedReceiver<ServerMessage>,
}

struct Server {
    renet: RenetServer,
    hub: Arc<ConnectionHub>,
    clients: HashMap<ClientId, Client>,
}

impl Server {
    fn new(hub: Arc<ConnectionHub>) -> Self {
        let connection_config = ConnectionConfig {
            available_bytes_per_tick: 60_000,
            server_channels_config: create_channel_configs(),
            client_channels_config: create_channel_configs(),
        };
        Self {
            renet: RenetServer::new(connection_config),
            hub,
            clients: HashMap::new(),
        }
    }

    fn update(&mut self) {
        while let Some(event) = self.renet.get_event() {
            self.handle_server_event(event);
        }

        for client_id in self.renet.clients_id() {
            for channel in [channel_id::EVENTS, channel_id::HEARTBEAT] {
                while let Some(message) = self.renet.receive_message(client_id, channel) {
                    self.handle_client_message(client_id, &message);
                }
            }
        }

        self.flush_outbound();
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ClientConnected { client_id } => {
                let connection = ConnectionId(client_id);
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, mut in_rx) = mpsc::unbounded_channel::<ClientMessage>();
                self.hub.open(connection, out_tx);

                let hub = Arc::clone(&self.hub);
                tokio::spawn(async move {
                    while let Some(message) = in_rx.recv().await {
                        hub.handle_message(connection, message).await;
                    }
                    hub.close(connection).await;
                });

                self.clients.insert(
                    client_id,
                    Client {
                        connection,
                        inbound: in_tx,
                        outbound: out_rx,
                    },
                );
                info!(
                    client_id,
                    connections = self.hub.connection_count(),
                    "client connected"
                );
            }
            ServerEvent::ClientDisconnected { client_id, reason } => {
                // Dropping the inbound sender ends the client's task, which closes the connection.
                if let Some(client) = self.clients.remove(&client_id) {
                    info!(
                        client_id,
                        connection_id = %client.connection,
                        ?reason,
                        "client disconnected"
                    );
                }
            }
        }
    }

    fn handle_client_message(&mut self, client_id: ClientId, data: &[u8]) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let Some(message) = self.hub.decode(client.connection, data) else {
            return;
        };
        if client.inbound.send(message).is_err() {
            debug!(client_id, "client task gone");
        }
    }

    fn flush_outbound(&mut self) {
        for (&client_id, client) in self.clients.iter_mut() {
            while let Ok(message) = client.outbound.try_recv() {
                match serialize_server_message(&message) {
                    Ok(data) => self
                        .renet
                        .send_message(client_id, channel_for(&message), data),
                    Err(e) => warn!(client_id, error = %e, "failed to encode server message"),
                }
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sagebrush_server=debug"
    } else {
        "sagebrush_server=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if cli.fixtures.is_some() {
        config.fixtures = cli.fixtures.clone();
    }
    if cli.persistence_dir.is_some() {
        config.persistence_dir = cli.persistence_dir.clone();
    }
    if cli.dice_seed.is_some() {
        config.dice_seed = cli.dice_seed;
    }
    Ok(config)
}

fn build_collaborators(config: &ServerConfig) -> Result<Collaborators> {
    let dice: Arc<dyn DiceRoller> = match config.dice_seed {
        Some(seed) => Arc::new(SeededDice::new(seed)),
        None => Arc::new(RandomDice),
    };
    let collaborators = match &config.fixtures {
        Some(path) => {
            let fixtures = Fixtures::load(path)?;
            info!(
                principals = fixtures.principals.len(),
                characters = fixtures.characters.len(),
                maps = fixtures.maps.len(),
                "fixtures loaded"
            );
            Collaborators {
                characters: Arc::new(fixtures.characters()),
                principals: Arc::new(fixtures.principals()),
                maps: Arc::new(fixtures.maps()),
                dice,
            }
        }
        None => {
            warn!("no fixtures configured; every principal is treated as a player");
            Collaborators {
                characters: Arc::new(Fixtures::default().characters()),
                principals: Arc::new(InMemoryPrincipals::default().with_fallback(Role::Player)),
                maps: Arc::new(Fixtures::default().maps()),
                dice,
            }
        }
    };
    Ok(collaborators)
}

async fn open_persistence(
    config: &ServerConfig,
) -> Result<Option<(PersistenceHandle, Vec<persistence::SessionRecord>)>> {
    let Some(dir) = &config.persistence_dir else {
        return Ok(None);
    };
    let records = persistence::load_all(dir)
        .await
        .with_context(|| format!("Failed to load session records from {}", dir.display()))?;
    let (handle, _writer) = persistence::spawn_writer(dir.clone())
        .await
        .with_context(|| format!("Failed to open persistence directory {}", dir.display()))?;
    Ok(Some((handle, records)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    let (persistence, records) = match open_persistence(&config).await? {
        Some((handle, records)) => (Some(handle), records),
        None => (None, Vec::new()),
    };
    let registry = Arc::new(SessionRegistry::new(
        RegistryConfig::from(&config),
        persistence.clone(),
    ));
    if !records.is_empty() {
        let restored = registry.restore(records);
        info!(restored, "sessions restored from disk");
    }

    let hub = Arc::new(ConnectionHub::new(
        Arc::clone(&registry),
        build_collaborators(&config)?,
        HubConfig::from(&config),
    ));

    let sweeper = {
        let registry = Arc::clone(&registry);
        let period = config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = registry.sweep_idle().await;
                if !evicted.is_empty() {
                    info!(evicted = evicted.len(), live = registry.len(), "idle sweep");
                }
            }
        })
    };

    let mut transport = ServerRunner::new(TransportConfig {
        public_address: config.bind_address,
        max_clients: config.max_clients,
        private_key: None, // Unsecure mode for development
    })?;
    let mut server = Server::new(hub);

    info!("Sagebrush server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        address = ?transport.local_addr(),
        protocol = format_args!("{PROTOCOL_ID:016x}"),
        "listening"
    );

    let tick = config.tick_duration();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                server.renet.update(now.duration_since(last_tick));
                last_tick = now;

                transport.receive(&mut server.renet);
                server.update();
                transport.send(&mut server.renet);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    sweeper.abort();
    server.renet.disconnect_all();
    transport.send(&mut server.renet);
    if let Some(persistence) = persistence {
        persistence.flush().await;
    }
    Ok(())
}

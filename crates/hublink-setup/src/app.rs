//! Command execution.

use std::future::Future;
use std::sync::Arc;

use hublink_core::transport::mock::{ConnectScript, MockTransport};
use hublink_core::{
    Config, Discovery, PairingRecord, PairingStore, Peripheral, PeripheralAddress, Result,
    TransportAdapter,
};
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ConnectArgs};

/// Loaded configuration plus the pairing store every command works on.
#[derive(Debug)]
pub struct App {
    config: Config,
    store: PairingStore,
}

impl App {
    /// Creates an app from already loaded parts.
    #[must_use]
    pub const fn new(config: Config, store: PairingStore) -> Self {
        Self { config, store }
    }

    /// Loads configuration and opens the default pairing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the data
    /// directory cannot be determined.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref())?;
        let store = PairingStore::open_default()?;
        Ok(Self::new(config, store))
    }

    /// Runs `command`, printing its result to stdout.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed command.
    pub async fn execute(&self, command: &Commands) -> Result<()> {
        match command {
            Commands::Connect(args) => {
                let record = self.connect(args, shutdown_signal()).await?;
                println!("{}", record.address);
            }
            Commands::ShowConfig => print!("{}", self.config.to_toml()?),
            Commands::Last => match self.store.load()? {
                Some(record) => println!(
                    "{} {} {}",
                    record.address,
                    record.name.as_deref().unwrap_or("-"),
                    record.paired_at_utc.to_rfc3339()
                ),
                None => println!("no controller paired yet"),
            },
            Commands::Forget => {
                self.store.clear()?;
                info!(path = %self.store.path().display(), "pairing record removed");
                println!("pairing record removed");
            }
        }
        Ok(())
    }

    /// Discovers and connects a controller, then stores the pairing record.
    ///
    /// The run is canceled when `shutdown` completes first.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened, discovery does not
    /// end connected, or the record cannot be stored.
    pub async fn connect<S>(&self, args: &ConnectArgs, shutdown: S) -> Result<PairingRecord>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let transport = self.transport(args.simulate).await?;
        let discovery = Discovery::new(Arc::clone(&transport), self.config.to_settings());
        let timeout = args.discovery_timeout(&self.config);
        let settings = discovery.settings();
        info!(
            ?timeout,
            connect_timeout = ?settings.connect_timeout,
            reuse_connected = settings.reuse_connected,
            simulate = args.simulate,
            "looking for a controller"
        );

        let run = discovery.start(timeout)?;
        let canceller = run.canceller();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            if canceller.cancel() {
                info!("interrupted, canceling discovery");
            }
        });
        let result = run.outcome().await;
        watcher.abort();
        let address = result?;

        let peripheral = transport
            .connected_peripherals()
            .into_iter()
            .find(|p| p.address == address)
            .unwrap_or_else(|| Peripheral::anonymous(address));
        let record = PairingRecord::now(&peripheral);
        self.store.save(&record)?;
        info!(%address, name = ?record.name, "controller paired");
        Ok(record)
    }

    async fn transport(&self, simulate: bool) -> Result<Arc<dyn TransportAdapter>> {
        #[cfg(feature = "bluetooth")]
        {
            if !simulate {
                let transport = hublink_core::BluezTransport::new(&self.config.bluetooth).await?;
                return Ok(Arc::new(transport));
            }
        }
        #[cfg(not(feature = "bluetooth"))]
        {
            if !simulate {
                warn!("built without Bluetooth support, using the simulated transport");
            }
        }
        Ok(Arc::new(simulated_transport(&self.config)?))
    }
}

/// Scripted transport for trying the tool without radio hardware.
///
/// The first controller refuses the connection, the second accepts it.
///
/// # Errors
///
/// Returns an error if the configured name pattern is invalid.
pub fn simulated_transport(config: &Config) -> Result<MockTransport> {
    let refusing = Peripheral::named(
        PeripheralAddress::new([0xC4, 0x1E, 0x02, 0x3A, 0x5B, 0x01]),
        "Nuimo",
    );
    let accepting = Peripheral::named(
        PeripheralAddress::new([0xC4, 0x1E, 0x02, 0x3A, 0x5B, 0x02]),
        "Nuimo",
    );
    Ok(MockTransport::new()
        .with_filter(config.peripheral_filter()?)
        .with_connect_script(
            refusing.address,
            ConnectScript::Fail("simulated: connection refused".into()),
        )
        .with_connect_script(accepting.address, ConnectScript::Succeed)
        .with_scan_results([refusing, accepting]))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

//! Demo command - shows writes surviving a host that commits eagerly.

use crate::config::Config;
use anyhow::Result;
use clap::Args;
use otter_idb::{DurableConfig, IdbError};
use otter_idb_host::AutoCommit;

#[derive(Args)]
pub struct DemoCommand {
    /// Entries to write
    #[arg(long, default_value_t = 8)]
    pub entries: usize,

    /// Requests the host serves before committing a transaction by itself
    #[arg(long, default_value_t = 1)]
    pub requests: usize,
}

impl DemoCommand {
    /// Runs against the configured database and storage. Only the
    /// auto-commit policy and the restart bound are replaced.
    pub fn run(&self, config: &Config) -> Result<()> {
        let requests = self.requests.max(1);
        // one restart per `requests` queued writes, plus slack
        let attempts = (self.entries / requests + 4).max(config.durable.max_attempts);
        let config = Config {
            database: config.database.clone(),
            host: config
                .host
                .clone()
                .auto_commit(AutoCommit::after_requests(requests)),
            durable: DurableConfig::new().with_max_attempts(attempts),
        };
        println!(
            "{}/{}: host commits after every {requests} request(s); writing {} entries",
            config.database.name, config.database.store, self.entries
        );

        let kv = super::open_kv(&config)?;
        for i in 0..self.entries {
            kv.set(format!("demo/{i:04}").as_bytes(), format!("value {i}").as_bytes())?;
        }
        println!(
            "{} write(s) queued while the backing transaction was inactive",
            kv.transaction().pending_operations()
        );

        kv.commit()?;
        println!("committed; {} entries stored", kv.size()?);

        let mut listed = 0;
        kv.scan_prefix(b"demo/", |key, value| {
            listed += 1;
            println!(
                "  {} = {}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            );
            Ok::<_, IdbError>(())
        })?;
        // earlier runs may have left entries in a persistent store
        anyhow::ensure!(
            listed >= self.entries,
            "scan listed {listed} entries, expected at least {}",
            self.entries
        );
        Ok(())
    }
}

//! Key-value commands - each runs in one durable transaction.

use super::open_kv;
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use otter_idb::IdbError;

fn show(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Args)]
pub struct SetCommand {
    pub key: String,
    pub value: String,
}

impl SetCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let kv = open_kv(config)?;
        kv.set(self.key.as_bytes(), self.value.as_bytes())?;
        kv.commit()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct GetCommand {
    pub key: String,
}

impl GetCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let kv = open_kv(config)?;
        match kv.get(self.key.as_bytes())? {
            Some(value) => println!("{}", show(&value)),
            None => anyhow::bail!("key '{}' not found", self.key),
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct DeleteCommand {
    pub key: String,
}

impl DeleteCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let kv = open_kv(config)?;
        kv.delete(self.key.as_bytes())?;
        kv.commit()?;
        Ok(())
    }
}

#[derive(Args)]
pub struct ScanCommand {
    /// Only list keys starting with this prefix
    #[arg(default_value = "")]
    pub prefix: String,

    /// Print keys only
    #[arg(long)]
    pub keys_only: bool,
}

impl ScanCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let kv = open_kv(config)?;
        if self.keys_only {
            kv.scan_prefix_keys(self.prefix.as_bytes(), |key| {
                println!("{}", show(key));
                Ok::<_, IdbError>(())
            })?;
        } else {
            kv.scan_prefix(self.prefix.as_bytes(), |key, value| {
                println!("{}\t{}", show(key), show(value));
                Ok::<_, IdbError>(())
            })?;
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct SizeCommand {}

impl SizeCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let kv = open_kv(config)?;
        println!("{}", kv.size()?);
        Ok(())
    }
}

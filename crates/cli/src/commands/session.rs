//! `agentgraph session` — inspect and delete stored session records.

use agentgraph_config::{AppConfig, SessionConfig};
use agentgraph_core::session::{SessionRecord, SessionStore};
use agentgraph_core::Result;
use agentgraph_memory::{InMemoryVersionedKv, OptimisticSessionStore, SqliteVersionedKv};

async fn open_store(config: &SessionConfig) -> Result<Box<dyn SessionStore>> {
    let store: Box<dyn SessionStore> = match config.backend.as_str() {
        "sqlite" => {
            let kv = SqliteVersionedKv::new(&config.sqlite_path).await?;
            Box::new(OptimisticSessionStore::new(kv).with_max_retry_attempts(config.max_retry_attempts))
        }
        _ => {
            println!("Session backend is in_memory; nothing is persisted between runs.");
            Box::new(
                OptimisticSessionStore::new(InMemoryVersionedKv::new())
                    .with_max_retry_attempts(config.max_retry_attempts),
            )
        }
    };
    Ok(store)
}

pub async fn list(user_id: &str) -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config.session).await?;
    let records = store.list(user_id).await?;
    if records.is_empty() {
        println!("No sessions for {user_id}.");
    }
    for record in &records {
        println!("{}", one_line(record));
    }
    Ok(())
}

pub async fn show(key: &str) -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config.session).await?;
    match store.get(key).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No session named {key}."),
    }
    Ok(())
}

pub async fn delete(key: &str) -> Result<()> {
    let config = AppConfig::load()?;
    let store = open_store(&config.session).await?;
    if store.delete(key).await? {
        println!("Deleted {key}.");
    } else {
        println!("No session named {key}.");
    }
    Ok(())
}

fn one_line(record: &SessionRecord) -> String {
    format!(
        "{:<24} v{:<4} updated {}",
        record.key,
        record.version,
        record.updated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

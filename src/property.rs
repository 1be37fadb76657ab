use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::{CodeGenerator, Engine};
use crate::limits::*;

/// One engine per hotel property. The property is the database name of the
/// pgwire connection; each gets its own WAL file and compactor task.
pub struct PropertyManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl PropertyManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Engine of `property`, opened (and replayed) on first use.
    ///
    /// Names map one-to-one onto WAL files: only `[A-Za-z0-9_-]` is accepted
    /// and case is folded, so two names that reach the same engine also share
    /// the same file and no other.
    pub fn get_or_create(&self, property: &str) -> io::Result<Arc<Engine>> {
        let key = property_key(property)?;
        if let Some(engine) = self.engines.get(&key) {
            return Ok(engine.value().clone());
        }

        if self.engines.len() >= MAX_PROPERTIES {
            return Err(io::Error::other("too many properties"));
        }

        // Entry lock: two first connections to a property must not both replay its WAL.
        let engine = match self.engines.entry(key.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{key}.wal"));
                let engine = Arc::new(Engine::new(wal_path, CodeGenerator::from_entropy())?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("property {key:?} opened");
        metrics::gauge!(crate::observability::PROPERTIES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn property_count(&self) -> usize {
        self.engines.len()
    }
}

/// Map key and WAL file stem of a property name.
fn property_key(property: &str) -> io::Result<String> {
    if property.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty property name"));
    }
    if property.len() > MAX_PROPERTY_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "property name too long",
        ));
    }
    if !property
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid property name {property:?}"),
        ));
    }
    Ok(property.to_ascii_lowercase())
}

//! Persistence of the last known set of features.
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use crate::{
    api::{Feature, FeatureResponse},
    Result,
};

/// Controls how the last fetched features are persisted.
///
/// The repository calls [`Storage::init`] and [`Storage::load`] once at startup, and
/// [`Storage::reset`] with `persist = true` after every successful fetch.
pub trait Storage: Send {
    /// Prepare the storage. `backup_path` is the directory to store data in and `app_name` can
    /// be used in naming.
    fn init(&mut self, backup_path: &Path, app_name: &str);

    /// Replace the stored features. If `persist` is true, the implementation should persist them.
    fn reset(&mut self, features: HashMap<String, Feature>, persist: bool) -> Result<()>;

    /// Load features from persistent storage into memory.
    fn load(&mut self) -> Result<()>;

    fn persist(&self) -> Result<()>;

    fn get(&self, name: &str) -> Option<&Feature>;

    fn list(&self) -> Vec<&Feature>;
}

/// File-backed storage. Features are kept in
/// `{backup_path}/unleash-repo-schema-v1-{app_name}.json`.
#[derive(Debug, Default)]
pub struct DefaultStorage {
    path: PathBuf,
    features: HashMap<String, Feature>,
}

impl DefaultStorage {
    pub fn new() -> DefaultStorage {
        DefaultStorage::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Storage for DefaultStorage {
    fn init(&mut self, backup_path: &Path, app_name: &str) {
        self.path = backup_path.join(format!("unleash-repo-schema-v1-{app_name}.json"));
        self.features = HashMap::new();
    }

    fn reset(&mut self, features: HashMap<String, Feature>, persist: bool) -> Result<()> {
        self.features = features;
        if persist {
            self.persist()?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let features: HashMap<String, Feature> = serde_json::from_reader(BufReader::new(file))?;
        self.features.extend(features);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer(&mut writer, &self.features)?;
        writer.flush()?;
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }

    fn list(&self) -> Vec<&Feature> {
        self.features.values().collect()
    }
}

/// Storage that falls back to a bootstrap document when nothing has been persisted yet.
///
/// The reader must yield a `client/features` response body. It is consumed at most once.
pub struct BootstrapStorage {
    backing_store: DefaultStorage,
    reader: Option<Box<dyn Read + Send>>,
}

impl BootstrapStorage {
    pub fn new(reader: impl Read + Send + 'static) -> BootstrapStorage {
        BootstrapStorage {
            backing_store: DefaultStorage::new(),
            reader: Some(Box::new(reader)),
        }
    }
}

impl Storage for BootstrapStorage {
    fn init(&mut self, backup_path: &Path, app_name: &str) {
        self.backing_store.init(backup_path, app_name);
    }

    fn reset(&mut self, features: HashMap<String, Feature>, persist: bool) -> Result<()> {
        self.backing_store.reset(features, persist)
    }

    fn load(&mut self) -> Result<()> {
        if let Err(err) = self.backing_store.load() {
            log::debug!(target: "unleash", err:display; "no persisted features, using bootstrap");
        }
        if self.backing_store.is_empty() {
            if let Some(reader) = self.reader.take() {
                let response: FeatureResponse = serde_json::from_reader(reader)?;
                self.backing_store.features = response.feature_map();
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.backing_store.persist()
    }

    fn get(&self, name: &str) -> Option<&Feature> {
        self.backing_store.get(name)
    }

    fn list(&self) -> Vec<&Feature> {
        self.backing_store.list()
    }
}

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::cache::{CacheRecord, CacheStorage};
use crate::config::parser;
use crate::config::value::ConfigValue;
use crate::error::Result;

pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Load-time policy: a missing root or import either contributes nothing
/// (the default) or fails the load
#[derive(Debug, Clone)]
pub struct ConfigStoreOptions {
    pub skip_missing_sources: bool,
}

impl Default for ConfigStoreOptions {
    fn default() -> Self {
        Self {
            skip_missing_sources: true,
        }
    }
}

/// The flattened configuration namespace, immutable once constructed.
/// Construction restores the map from the cache when the record's fingerprint
/// is byte-identical to the current root source, and re-parses otherwise.
/// Only the root file is fingerprinted: edits to an imported file alone do
/// not invalidate the cache.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    map: ConfigMap,
}

impl ConfigStore {
    pub fn open(root: impl AsRef<Path>, cache: &dyn CacheStorage) -> Result<Self> {
        Self::open_with(root, cache, ConfigStoreOptions::default())
    }

    pub fn open_with(
        root: impl AsRef<Path>,
        cache: &dyn CacheStorage,
        options: ConfigStoreOptions,
    ) -> Result<Self> {
        let root = root.as_ref();
        let current = std::fs::read(root).ok();

        if let Some(current) = &current {
            if let Some(record) = cache.load()? {
                if record.fingerprint == *current {
                    match serde_json::from_slice(&record.map) {
                        Ok(map) => {
                            tracing::debug!(root = %root.display(), "config cache hit");
                            return Ok(Self { map });
                        }
                        Err(err) => {
                            tracing::warn!(%err, "config cache map was unreadable, re-parsing");
                        }
                    }
                }
            }
        }

        tracing::debug!(root = %root.display(), "config cache miss, parsing");
        let entries = parser::parse_source(root, "", options.skip_missing_sources)?;
        let mut map = ConfigMap::new();
        for entry in &entries {
            store_param(&mut map, &entry.key, &entry.raw);
        }

        // A missing root leaves nothing to fingerprint, so nothing to cache.
        if let Some(fingerprint) = current {
            let record = CacheRecord {
                map: serde_json::to_vec(&map)?,
                fingerprint,
            };
            cache.save(&record)?;
        }

        Ok(Self { map })
    }

    /// Returns the stored value verbatim; no coercion happens at read time
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.map.get(key)
    }

    /// Absent keys resolve to the caller's default, which is not checked
    /// against what a parse would have produced for that key
    pub fn get_or<'a>(&'a self, key: &str, default: &'a ConfigValue) -> &'a ConfigValue {
        self.map.get(key).unwrap_or(default)
    }

    pub fn get_all(&self) -> &ConfigMap {
        &self.map
    }
}

/// Folds one raw entry into the map: `[]`-suffixed keys append to the
/// sequence under the base key, any other key is last-write-wins
pub fn store_param(map: &mut ConfigMap, name: &str, raw: &str) {
    let value = ConfigValue::coerce(raw);

    if let Some(base) = name.strip_suffix("[]") {
        let slot = map
            .entry(base.to_owned())
            .and_modify(|existing| {
                if !matches!(existing, ConfigValue::List(_)) {
                    *existing = ConfigValue::List(Vec::new());
                }
            })
            .or_insert_with(|| ConfigValue::List(Vec::new()));
        if let ConfigValue::List(items) = slot {
            items.push(value);
        }
    } else {
        map.insert(name.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{store_param, ConfigMap, ConfigStore, ConfigStoreOptions};
    use crate::config::cache::{CacheRecord, CacheStorage, DirCacheStorage, MemoryCacheStorage};
    use crate::config::value::ConfigValue;
    use crate::error::{Error, Result};

    const ROOT_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<cfg:Config xmlns:cfg="https://pictor.dev/config/1.0">
    <cfg:Import src="import1.xml" />

    <cfg:Group name="thumbnail">
        <cfg:Param name="width" value="400" />
        <cfg:Param name="height" value="400" />
        <cfg:Param name="crop" value="true" />
    </cfg:Group>

    <cfg:Param name="arrayvalue[]" value="abc" />
    <cfg:Param name="arrayvalue[]" value="def" />

    <cfg:Group name="group">
        <cfg:Group name="innergroup">
            <cfg:Param name="value1" value="abc" />
            <cfg:Param name="value2" value="def" />
        </cfg:Group>
    </cfg:Group>

    <cfg:Param name="ratio" value="3.14" />
    <cfg:Param name="longtext"><![CDATA[
        <p>Lorem ipsum dolor sit amet.</p>
    ]]></cfg:Param>
</cfg:Config>
"#;

    const IMPORT_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<cfg:Config xmlns:cfg="https://pictor.dev/config/1.0">
    <cfg:Group name="imported">
        <cfg:Param name="importedValue" value="xyz" />
    </cfg:Group>
</cfg:Config>
"#;

    /// Counts storage traffic so tests can tell a cache hit from a re-parse.
    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryCacheStorage,
        saves: AtomicUsize,
    }

    impl CacheStorage for CountingStorage {
        fn load(&self) -> Result<Option<CacheRecord>> {
            self.inner.load()
        }

        fn save(&self, record: &CacheRecord) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(record)
        }
    }

    fn write_fixture(dir: &Path) -> PathBuf {
        std::fs::write(dir.join("import1.xml"), IMPORT_XML).expect("write import");
        let root = dir.join("root.xml");
        std::fs::write(&root, ROOT_XML).expect("write root");
        root
    }

    #[test]
    fn flattens_nested_groups_and_coerces_scalars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let store = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");

        assert_eq!(store.get("thumbnail/width"), Some(&ConfigValue::Int(400)));
        assert_eq!(store.get("thumbnail/crop"), Some(&ConfigValue::Bool(true)));
        assert_eq!(store.get("ratio"), Some(&ConfigValue::Float(3.14)));
        assert_eq!(
            store.get("group/innergroup/value1"),
            Some(&ConfigValue::Str("abc".to_owned()))
        );
        assert_eq!(
            store.get("group/innergroup/value2"),
            Some(&ConfigValue::Str("def".to_owned()))
        );
    }

    #[test]
    fn accumulates_repeated_keys_in_document_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let store = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");

        assert_eq!(
            store.get("arrayvalue"),
            Some(&ConfigValue::List(vec![
                ConfigValue::Str("abc".to_owned()),
                ConfigValue::Str("def".to_owned()),
            ]))
        );
    }

    #[test]
    fn resolves_imports_relative_to_the_importing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let store = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");

        assert_eq!(
            store.get("imported/importedValue"),
            Some(&ConfigValue::Str("xyz".to_owned()))
        );
    }

    #[test]
    fn preserves_inline_cdata_markup_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let store = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");

        let longtext = store
            .get("longtext")
            .and_then(ConfigValue::as_str)
            .expect("longtext");
        assert!(longtext.contains("<p>Lorem ipsum dolor sit amet.</p>"));
    }

    #[test]
    fn get_or_falls_back_only_for_absent_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let store = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");

        let default = ConfigValue::Int(9);
        assert_eq!(store.get_or("thumbnail/width", &default), &ConfigValue::Int(400));
        assert_eq!(store.get_or("thumbnail/missing", &default), &default);
        assert_eq!(store.get("thumbnail/missing"), None);
    }

    #[test]
    fn cache_hit_skips_the_parse_and_matches_the_fresh_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let cache = CountingStorage::default();

        let fresh = ConfigStore::open(&root, &cache).expect("first open");
        assert_eq!(cache.saves.load(Ordering::SeqCst), 1);

        let cached = ConfigStore::open(&root, &cache).expect("second open");
        // No second save: the record was restored, not rebuilt.
        assert_eq!(cache.saves.load(Ordering::SeqCst), 1);
        assert_eq!(cached.get_all(), fresh.get_all());
    }

    #[test]
    fn identical_content_produces_identical_cache_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());

        let first = MemoryCacheStorage::new();
        let second = MemoryCacheStorage::new();
        ConfigStore::open(&root, &first).expect("open");
        ConfigStore::open(&root, &second).expect("open");

        assert_eq!(
            first.load().expect("load"),
            second.load().expect("load"),
            "two parses of the same bytes must persist the same record"
        );
    }

    #[test]
    fn any_root_byte_change_invalidates_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let cache = CountingStorage::default();

        ConfigStore::open(&root, &cache).expect("first open");
        assert_eq!(cache.saves.load(Ordering::SeqCst), 1);

        // Trailing whitespace changes no semantics, but it changes bytes.
        let mut content = std::fs::read_to_string(&root).expect("read root");
        content.push('\n');
        std::fs::write(&root, content).expect("rewrite root");

        let store = ConfigStore::open(&root, &cache).expect("second open");
        assert_eq!(cache.saves.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("thumbnail/width"), Some(&ConfigValue::Int(400)));
    }

    #[test]
    fn imported_file_changes_alone_do_not_invalidate_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let cache = MemoryCacheStorage::new();

        ConfigStore::open(&root, &cache).expect("first open");
        std::fs::write(
            dir.path().join("import1.xml"),
            IMPORT_XML.replace("xyz", "zzz"),
        )
        .expect("rewrite import");

        // Stale by design: only the root file is fingerprinted.
        let store = ConfigStore::open(&root, &cache).expect("second open");
        assert_eq!(
            store.get("imported/importedValue"),
            Some(&ConfigValue::Str("xyz".to_owned()))
        );
    }

    #[test]
    fn missing_root_is_empty_under_the_skip_policy_and_fatal_without_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("absent.xml");
        let cache = CountingStorage::default();

        let store = ConfigStore::open(&root, &cache).expect("open");
        assert!(store.get_all().is_empty());
        // Nothing to fingerprint, so nothing was persisted.
        assert_eq!(cache.saves.load(Ordering::SeqCst), 0);

        let strict = ConfigStore::open_with(
            &root,
            &cache,
            ConfigStoreOptions {
                skip_missing_sources: false,
            },
        );
        assert!(matches!(strict, Err(Error::SourceNotFound(_))));
    }

    #[test]
    fn missing_import_is_fatal_when_the_skip_policy_is_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        std::fs::remove_file(dir.path().join("import1.xml")).expect("remove import");

        let skipped = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");
        assert_eq!(skipped.get("imported/importedValue"), None);
        assert_eq!(skipped.get("thumbnail/width"), Some(&ConfigValue::Int(400)));

        let strict = ConfigStore::open_with(
            &root,
            &MemoryCacheStorage::new(),
            ConfigStoreOptions {
                skip_missing_sources: false,
            },
        );
        assert!(matches!(strict, Err(Error::SourceNotFound(_))));
    }

    #[test]
    fn later_entries_overwrite_earlier_ones_across_imports() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("defaults.xml"),
            r#"<cfg:Config xmlns:cfg="https://pictor.dev/config/1.0">
                <cfg:Param name="mode" value="fast" />
            </cfg:Config>"#,
        )
        .expect("write defaults");
        let root = dir.path().join("root.xml");
        std::fs::write(
            &root,
            r#"<cfg:Config xmlns:cfg="https://pictor.dev/config/1.0">
                <cfg:Import src="defaults.xml" />
                <cfg:Param name="mode" value="quality" />
            </cfg:Config>"#,
        )
        .expect("write root");

        let store = ConfigStore::open(&root, &MemoryCacheStorage::new()).expect("open");
        assert_eq!(
            store.get("mode"),
            Some(&ConfigValue::Str("quality".to_owned()))
        );
    }

    #[test]
    fn dir_cache_storage_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = write_fixture(dir.path());
        let storage = DirCacheStorage::new(dir.path().join("cache"));

        let fresh = ConfigStore::open(&root, &storage).expect("first open");
        assert!(storage.map_path().exists());
        assert_eq!(
            std::fs::read(storage.fingerprint_path()).expect("fingerprint"),
            std::fs::read(&root).expect("root bytes")
        );

        let cached = ConfigStore::open(&root, &storage).expect("second open");
        assert_eq!(cached.get_all(), fresh.get_all());
    }

    #[test]
    fn store_param_appends_and_overwrites() {
        let mut map = ConfigMap::new();

        store_param(&mut map, "key", "1");
        store_param(&mut map, "key", "2");
        assert_eq!(map.get("key"), Some(&ConfigValue::Int(2)));

        store_param(&mut map, "items[]", "p");
        store_param(&mut map, "items[]", "q");
        assert_eq!(
            map.get("items"),
            Some(&ConfigValue::List(vec![
                ConfigValue::Str("p".to_owned()),
                ConfigValue::Str("q".to_owned()),
            ]))
        );

        // A scalar under the base key gives way to a fresh sequence.
        store_param(&mut map, "key[]", "3");
        assert_eq!(
            map.get("key"),
            Some(&ConfigValue::List(vec![ConfigValue::Int(3)]))
        );
    }
}

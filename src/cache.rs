use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hashbrown::HashMap;
use log::{debug, info, trace};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

use crate::binxml::SubstitutionValue;
use crate::err::{Result, WevtError};
use crate::extract::extract_wevt_template_resources;
use crate::guid::Guid;
use crate::manifest::{EventKey, Manifest, Template};
use crate::wevtcache::{CacheEntry, CacheFileError, WevtCacheReader, WevtCacheWriter};

/// File extensions [`WevtCache::add_dir`] picks up by default.
pub const DEFAULT_PE_EXTENSIONS: &[&str] = &["exe", "dll", "sys"];

/// Lifecycle of a [`WevtCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing was ever committed.
    Empty,
    /// At least one `add_*` call committed.
    Populated,
    /// The committed index was written by [`WevtCache::dump`].
    Persisted,
    /// The index was read by [`WevtCache::load`].
    Loaded,
}

#[derive(Debug)]
struct CacheIndex {
    events: HashMap<EventKey, Guid>,
    templates: HashMap<Guid, Arc<Template>>,
    state: CacheState,
}

impl Default for CacheIndex {
    fn default() -> Self {
        CacheIndex {
            events: HashMap::new(),
            templates: HashMap::new(),
            state: CacheState::Empty,
        }
    }
}

/// Entries derived from one input, not yet visible to readers.
#[derive(Debug, Default)]
struct StagedBatch {
    events: Vec<(EventKey, Guid)>,
    templates: Vec<Arc<Template>>,
}

impl StagedBatch {
    fn stage_manifest(&mut self, manifest: &Manifest) {
        let index = manifest.build_index();
        self.templates
            .extend(index.templates.into_values().map(|t| Arc::new(t.clone())));
        self.events.extend(index.event_templates);
    }
}

/// Template cache keyed by provider identity.
///
/// Shared by reference across threads: `add_*` calls are serialized and only ever publish a
/// fully decoded batch, so lookups observe either all or none of an input. When a key or a
/// template GUID is added twice, the later addition wins.
#[derive(Debug, Default)]
pub struct WevtCache {
    writer: Mutex<()>,
    index: RwLock<CacheIndex>,
}

impl WevtCache {
    pub fn new() -> Self {
        WevtCache::default()
    }

    fn read_index(&self) -> RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add every `WEVT_TEMPLATE` manifest of the PE image at `path`.
    ///
    /// All or nothing: on any error the cache is left untouched. Returns the number of
    /// templates committed.
    pub fn add_dll(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let batch = decode_pe_file(path)?;
        Ok(self.commit(vec![batch]))
    }

    /// Same as [`WevtCache::add_dll`], for an in-memory PE image.
    pub fn add_pe_bytes(&self, pe_bytes: &[u8]) -> Result<usize> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let batch = decode_pe(pe_bytes, Path::new("<memory>"))?;
        Ok(self.commit(vec![batch]))
    }

    /// Add one raw CRIM blob (the payload of a `WEVT_TEMPLATE` resource).
    pub fn add_manifest_bytes(&self, crim: &[u8]) -> Result<usize> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let manifest = Manifest::parse(crim)?;
        let mut batch = StagedBatch::default();
        batch.stage_manifest(&manifest);
        Ok(self.commit(vec![batch]))
    }

    /// Add every PE file below `dir` whose extension is in `extensions` (case-insensitive).
    ///
    /// Files are decoded (in parallel with the `multithreading` feature) and committed in sorted
    /// path order as a single batch; the first failing file aborts the whole call.
    pub fn add_dir(&self, dir: impl AsRef<Path>, recursive: bool, extensions: &[&str]) -> Result<usize> {
        let dir = dir.as_ref();
        let files = collect_pe_files(dir, recursive, extensions)?;
        debug!("found {} candidate file(s) in `{}`", files.len(), dir.display());

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        #[cfg(feature = "multithreading")]
        let decoded: Vec<Result<StagedBatch>> = files.par_iter().map(|p| decode_pe_file(p)).collect();
        #[cfg(not(feature = "multithreading"))]
        let decoded: Vec<Result<StagedBatch>> = files.iter().map(|p| decode_pe_file(p)).collect();

        let batches = decoded.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(self.commit(batches))
    }

    /// Publish staged batches in order. Nothing in here can fail.
    fn commit(&self, batches: Vec<StagedBatch>) -> usize {
        let mut index = self.write_index();
        let mut committed = 0;

        for batch in batches {
            for template in batch.templates {
                let guid = template.guid;
                if index.templates.insert(guid, template).is_some() {
                    trace!("template {guid} replaced by a later definition");
                }
                committed += 1;
            }
            for (key, template_guid) in batch.events {
                if let Some(previous) = index.events.insert(key, template_guid) {
                    if previous != template_guid {
                        debug!(
                            "provider {} event {} v{}: template {previous} replaced by {template_guid}",
                            key.provider_guid, key.event_id, key.version
                        );
                    }
                }
            }
        }

        if committed > 0 {
            index.state = CacheState::Populated;
        }
        debug!(
            "committed {committed} template(s); cache holds {} event(s), {} template(s)",
            index.events.len(),
            index.templates.len()
        );
        committed
    }

    /// Exact lookup of the template GUID for `(provider, event id, version)`.
    pub fn resolve_template_guid(
        &self,
        provider_guid: &Guid,
        event_id: u16,
        version: u8,
    ) -> Result<Guid> {
        let key = EventKey {
            provider_guid: *provider_guid,
            event_id,
            version,
        };

        self.read_index()
            .events
            .get(&key)
            .copied()
            .ok_or(WevtError::EventNotFound {
                provider_guid: *provider_guid,
                event_id,
                version,
            })
    }

    /// The template registered under `guid`.
    pub fn template(&self, guid: &Guid) -> Option<Arc<Template>> {
        self.read_index().templates.get(guid).cloned()
    }

    fn require_template(&self, guid: &Guid) -> Result<Arc<Template>> {
        self.template(guid)
            .ok_or(WevtError::TemplateNotFound { guid: *guid })
    }

    /// Render a template with `values[N]` in place of substitution `N`.
    ///
    /// Referencing a slot past the end of `values` is an error.
    pub fn render_template_xml(&self, template_guid: &Guid, values: &[SubstitutionValue]) -> Result<String> {
        let template = self.require_template(template_guid)?;
        Ok(template.render_with_values(values)?)
    }

    /// Render a template with `{sub:N}` placeholders.
    pub fn template_xml(&self, template_guid: &Guid) -> Result<String> {
        Ok(self.require_template(template_guid)?.to_xml())
    }

    /// [`WevtCache::resolve_template_guid`] followed by [`WevtCache::render_template_xml`].
    pub fn render_event_xml(
        &self,
        provider_guid: &Guid,
        event_id: u16,
        version: u8,
        values: &[SubstitutionValue],
    ) -> Result<String> {
        let template_guid = self.resolve_template_guid(provider_guid, event_id, version)?;
        self.render_template_xml(&template_guid, values)
    }

    /// Number of entries (event mappings plus templates); matches the entry count of a dump.
    pub fn len(&self) -> usize {
        let index = self.read_index();
        index.events.len() + index.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn event_count(&self) -> usize {
        self.read_index().events.len()
    }

    pub fn template_count(&self) -> usize {
        self.read_index().templates.len()
    }

    pub fn state(&self) -> CacheState {
        self.read_index().state
    }

    /// Write the committed index to `path`.
    ///
    /// Templates are written first (sorted by GUID), then events (sorted by key), so identical
    /// caches produce identical files. Returns the number of entries written.
    pub fn dump(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<u32> {
        let path = path.as_ref();
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let written = {
            let index = self.read_index();

            let mut templates: Vec<&Arc<Template>> = index.templates.values().collect();
            templates.sort_by_key(|t| t.guid);
            let mut events: Vec<(&EventKey, &Guid)> = index.events.iter().collect();
            events.sort();

            let mut writer = WevtCacheWriter::create(path, overwrite)?;
            for template in templates {
                writer.write_template(&template.guid, template.offset, template.raw())?;
            }
            for (key, template_guid) in events {
                writer.write_event(key, template_guid)?;
            }
            writer.finish()?
        };

        self.write_index().state = CacheState::Persisted;
        info!("wrote {written} cache entries to `{}`", path.display());
        Ok(written)
    }

    /// Read a cache written by [`WevtCache::dump`].
    ///
    /// Every template body is decoded again; an event entry naming a template that does not
    /// precede it is rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = WevtCacheReader::open(path)?;
        let mut index = CacheIndex {
            state: CacheState::Loaded,
            ..CacheIndex::default()
        };

        while let Some(entry) = reader.next_entry()? {
            match entry {
                CacheEntry::Template { guid, offset, temp } => {
                    let template = Template::parse(&temp, offset)?;
                    if template.guid != guid {
                        return Err(CacheFileError::MalformedEntry {
                            path: path.to_path_buf(),
                            kind: crate::wevtcache::EntryKind::Template,
                            reason: "entry GUID does not match the TEMP header",
                        }
                        .into());
                    }
                    index.templates.insert(guid, Arc::new(template));
                }
                CacheEntry::Event { key, template_guid } => {
                    if !index.templates.contains_key(&template_guid) {
                        return Err(CacheFileError::DanglingTemplate {
                            path: path.to_path_buf(),
                            key,
                            template_guid,
                        }
                        .into());
                    }
                    index.events.insert(key, template_guid);
                }
            }
        }

        info!(
            "loaded {} event(s) and {} template(s) from `{}`",
            index.events.len(),
            index.templates.len(),
            path.display()
        );

        Ok(WevtCache {
            writer: Mutex::new(()),
            index: RwLock::new(index),
        })
    }
}

fn decode_pe_file(path: &Path) -> Result<StagedBatch> {
    let bytes = fs::read(path).map_err(|source| WevtError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_pe(&bytes, path)
}

fn decode_pe(pe_bytes: &[u8], origin: &Path) -> Result<StagedBatch> {
    let resources = extract_wevt_template_resources(pe_bytes)?;
    if resources.is_empty() {
        return Err(WevtError::NoWevtTemplate {
            path: origin.to_path_buf(),
        });
    }

    let mut batch = StagedBatch::default();
    for (resource_index, resource) in resources.iter().enumerate() {
        let manifest =
            Manifest::parse(&resource.data).map_err(|source| WevtError::ManifestInResource {
                path: origin.to_path_buf(),
                resource_index,
                source,
            })?;
        batch.stage_manifest(&manifest);
    }

    debug!(
        "`{}`: staged {} template(s) from {} resource(s)",
        origin.display(),
        batch.templates.len(),
        resources.len()
    );
    Ok(batch)
}

fn collect_pe_files(dir: &Path, recursive: bool, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let invalid_dir = |message: &str| WevtError::Io {
        path: dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, message.to_string()),
    };

    if !dir.is_dir() {
        return Err(invalid_dir("not a directory"));
    }
    let base = dir
        .to_str()
        .ok_or_else(|| invalid_dir("path is not valid UTF-8"))?;
    let base = glob::Pattern::escape(base);

    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut files = BTreeSet::new();
    for ext in extensions {
        let pattern = if recursive {
            format!("{base}/**/*.{ext}")
        } else {
            format!("{base}/*.{ext}")
        };

        let entries =
            glob::glob_with(&pattern, options).map_err(|e| invalid_dir(e.msg))?;
        for entry in entries {
            let path = entry.map_err(|e| WevtError::Io {
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            if path.is_file() {
                files.insert(path);
            }
        }
    }

    Ok(files.into_iter().collect())
}

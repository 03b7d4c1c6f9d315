//! Site catalog: walk the public directory and address every file.
//!
//! Produces the path→hash manifest submitted to the hosting service and
//! the hash→gzip store that required uploads are served from.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use rayon::prelude::*;
use tracing::debug;
use walkdir::WalkDir;

use crate::addresser::{address_file, Addressed, ContentHash};
use crate::cancel::Cancellation;
use crate::error::DeployError;

/// Site path (always `/`-prefixed) → content hash
pub type Manifest = BTreeMap<String, ContentHash>;

/// Content hash → compressed bytes.
/// Built once per run, read-only afterwards
#[derive(Debug, Default)]
pub struct ContentStore {
    blobs: HashMap<ContentHash, Vec<u8>>,
}

impl ContentStore {
    /// Keeps the first payload seen for a hash; identical hashes carry identical bytes
    pub fn insert(&mut self, hash: ContentHash, compressed: Vec<u8>) {
        self.blobs.entry(hash).or_insert(compressed);
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&[u8]> {
        self.blobs.get(hash).map(Vec::as_slice)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.blobs.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Total compressed size across distinct blobs
    pub fn total_bytes(&self) -> u64 {
        self.blobs.values().map(|b| b.len() as u64).sum()
    }
}

/// Manifest and store produced by one walk
#[derive(Debug, Default)]
pub struct Catalog {
    pub manifest: Manifest,
    pub store: ContentStore,
}

/// A regular file found under the site root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Root-relative path with `/` separators and a leading `/`
    pub site_path: String,
    /// Location on disk
    pub path: PathBuf,
}

/// Glob patterns excluded from deployment, with gitignore semantics.
///
/// A pattern that matches a directory excludes everything below it.
#[derive(Debug)]
pub struct IgnoreRules {
    matcher: Gitignore,
    pattern_count: usize,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::empty()
    }
}

impl IgnoreRules {
    /// Rule set that matches nothing
    pub fn empty() -> Self {
        Self {
            matcher: Gitignore::empty(),
            pattern_count: 0,
        }
    }

    /// Compile `patterns` relative to `root`
    pub fn from_patterns<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Self, DeployError> {
        let mut builder = GitignoreBuilder::new(root);
        let mut pattern_count = 0;

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            builder
                .add_line(None, pattern)
                .map_err(|e| DeployError::Config {
                    message: format!("invalid ignore pattern {pattern:?}: {e}"),
                })?;
            pattern_count += 1;
        }

        let matcher = builder.build().map_err(|e| DeployError::Config {
            message: format!("cannot compile ignore patterns: {e}"),
        })?;

        Ok(Self {
            matcher,
            pattern_count,
        })
    }

    /// Check a file's site path (`/`-prefixed or not) against the rules
    pub fn is_ignored(&self, site_path: &str) -> bool {
        self.matches(site_path, false)
    }

    /// Check a directory's site path; a match excludes the whole subtree
    pub fn is_ignored_dir(&self, site_path: &str) -> bool {
        self.matches(site_path, true)
    }

    fn matches(&self, site_path: &str, is_dir: bool) -> bool {
        let relative = site_path.trim_start_matches('/');
        if relative.is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(Path::new(relative), is_dir)
            .is_ignore()
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_count == 0
    }
}

/// Convert a root-relative path into its `/`-prefixed site path
pub fn site_path(relative: &Path) -> Option<String> {
    let mut out = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                out.push('/');
                out.push_str(name.to_str()?);
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// List every regular file under `root`, sorted by path.
///
/// Ignored directories are pruned without being read, so nothing below them
/// (dangling links, link loops, unreadable entries) can fail the walk. Any
/// other unreadable entry fails the walk; a partial listing is never returned.
pub fn walk_files(
    root: &Path,
    rules: &IgnoreRules,
    cancel: &Cancellation,
) -> Result<Vec<LocalFile>, DeployError> {
    let walk_error = |message: String| DeployError::Walk {
        root: root.to_path_buf(),
        message,
    };
    let relative_site_path = |path: &Path| path.strip_prefix(root).ok().and_then(site_path);

    let metadata = fs::metadata(root).map_err(|e| walk_error(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(walk_error("not a directory".to_string()));
    }

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let pruned = relative_site_path(entry.path())
                .is_some_and(|dir| rules.is_ignored_dir(&dir));
            if pruned {
                debug!(path = %entry.path().display(), "ignored directory");
            }
            !pruned
        });

    let mut files = Vec::new();
    for entry in walker {
        cancel.check()?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // An ignored entry that cannot be followed is skipped like any ignored file
                let ignored = e
                    .path()
                    .and_then(|path| relative_site_path(path))
                    .is_some_and(|path| rules.is_ignored(&path));
                if ignored {
                    debug!(error = %e, "skipped ignored entry");
                    continue;
                }
                return Err(walk_error(e.to_string()));
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| walk_error(e.to_string()))?;
        let site_path = site_path(relative)
            .ok_or_else(|| walk_error(format!("unsupported path {}", relative.display())))?;

        files.push(LocalFile {
            site_path,
            path: entry.into_path(),
        });
    }

    Ok(files)
}

/// Drop ignored files. Pure filter, no filesystem access
pub fn select_files(files: Vec<LocalFile>, rules: &IgnoreRules) -> Vec<LocalFile> {
    files
        .into_iter()
        .filter(|file| {
            let ignored = rules.is_ignored(&file.site_path);
            if ignored {
                debug!(path = %file.site_path, "ignored");
            }
            !ignored
        })
        .collect()
}

/// Walk `root`, filter through `rules` and address the remaining files in parallel
pub fn build_catalog(
    root: &Path,
    rules: &IgnoreRules,
    cancel: &Cancellation,
) -> Result<Catalog, DeployError> {
    let files = select_files(walk_files(root, rules, cancel)?, rules);

    let addressed: Vec<(String, Addressed)> = files
        .par_iter()
        .map(|file| -> Result<(String, Addressed), DeployError> {
            cancel.check()?;
            let addressed = address_file(&file.path).map_err(|source| DeployError::Hash {
                path: file.site_path.clone(),
                source,
            })?;
            Ok((file.site_path.clone(), addressed))
        })
        .collect::<Result<_, _>>()?;

    let mut catalog = Catalog::default();
    for (site_path, addressed) in addressed {
        catalog
            .manifest
            .insert(site_path, addressed.hash.clone());
        catalog.store.insert(addressed.hash, addressed.compressed);
    }

    debug!(
        files = catalog.manifest.len(),
        blobs = catalog.store.len(),
        "catalog built"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresser::address_bytes;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn local(site_path: &str) -> LocalFile {
        LocalFile {
            site_path: site_path.to_string(),
            path: PathBuf::from(site_path.trim_start_matches('/')),
        }
    }

    // ==================== site_path tests ====================

    #[test]
    fn test_site_path_prefixes_slash() {
        assert_eq!(site_path(Path::new("index.html")).unwrap(), "/index.html");
    }

    #[test]
    fn test_site_path_nested() {
        let rel: PathBuf = ["css", "main", "site.css"].iter().collect();
        assert_eq!(site_path(&rel).unwrap(), "/css/main/site.css");
    }

    #[test]
    fn test_site_path_rejects_parent_and_empty() {
        assert!(site_path(Path::new("../escape")).is_none());
        assert!(site_path(Path::new("")).is_none());
    }

    // ==================== IgnoreRules tests ====================

    #[test]
    fn test_empty_rules_ignore_nothing() {
        let rules = IgnoreRules::empty();
        assert!(rules.is_empty());
        assert!(!rules.is_ignored("/index.html"));
        assert!(!rules.is_ignored("/.hidden"));
    }

    #[test]
    fn test_rules_match_default_firebase_patterns() {
        let root = Path::new("/site");
        let rules =
            IgnoreRules::from_patterns(root, &["firebase.json", "**/.*", "**/node_modules/**"])
                .unwrap();

        assert_eq!(rules.pattern_count(), 3);
        assert!(rules.is_ignored("/firebase.json"));
        assert!(rules.is_ignored("/.DS_Store"));
        assert!(rules.is_ignored("/assets/.gitkeep"));
        assert!(rules.is_ignored("/node_modules/pkg/index.js"));
        assert!(!rules.is_ignored("/index.html"));
        assert!(!rules.is_ignored("/assets/app.js"));
    }

    #[test]
    fn test_rules_directory_pattern_covers_children() {
        let rules = IgnoreRules::from_patterns(Path::new("/site"), &["drafts"]).unwrap();
        assert!(rules.is_ignored("/drafts/post.html"));
        assert!(!rules.is_ignored("/posts/drafts.html"));
    }

    #[test]
    fn test_rules_skip_blank_patterns() {
        let rules = IgnoreRules::from_patterns(Path::new("/site"), &["", "  ", "*.map"]).unwrap();
        assert_eq!(rules.pattern_count(), 1);
        assert!(rules.is_ignored("/js/app.js.map"));
    }

    #[test]
    fn test_rules_invalid_pattern_is_config_error() {
        let result = IgnoreRules::from_patterns(Path::new("/site"), &["[z-a]"]);
        assert!(matches!(result, Err(DeployError::Config { .. })));
    }

    // ==================== select_files tests ====================

    #[test]
    fn test_select_files_is_pure_filter() {
        let rules = IgnoreRules::from_patterns(Path::new("/site"), &["*.log"]).unwrap();
        let files = vec![local("/a.html"), local("/debug.log"), local("/b/c.css")];

        let selected = select_files(files, &rules);

        let paths: Vec<_> = selected.iter().map(|f| f.site_path.as_str()).collect();
        assert_eq!(paths, vec!["/a.html", "/b/c.css"]);
    }

    // ==================== walk_files tests ====================

    #[test]
    fn test_walk_files_sorted_and_normalized() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "z.txt", "z");
        write(temp.path(), "a/b.txt", "b");
        write(temp.path(), "a/a.txt", "a");

        let files =
            walk_files(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.site_path.as_str()).collect();
        assert_eq!(paths, vec!["/a/a.txt", "/a/b.txt", "/z.txt"]);
    }

    #[test]
    fn test_walk_files_missing_root() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing");
        let result = walk_files(&missing, &IgnoreRules::empty(), &Cancellation::new());
        assert!(matches!(result, Err(DeployError::Walk { .. })));
    }

    #[test]
    fn test_walk_files_root_is_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "file.txt", "x");
        let file = temp.path().join("file.txt");
        let result = walk_files(&file, &IgnoreRules::empty(), &Cancellation::new());
        assert!(matches!(result, Err(DeployError::Walk { .. })));
    }

    #[test]
    fn test_walk_files_cancelled() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "x");
        let cancel = Cancellation::new();
        cancel.cancel();

        let result = walk_files(temp.path(), &IgnoreRules::empty(), &cancel);
        assert!(matches!(result, Err(DeployError::Cancelled)));
    }

    #[test]
    fn test_rules_directory_match() {
        let rules = IgnoreRules::from_patterns(Path::new("/site"), &["**/.*", "cache/"]).unwrap();
        assert!(rules.is_ignored_dir("/.cache"));
        assert!(rules.is_ignored_dir("/cache"));
        assert!(!rules.is_ignored("/cache"));
        assert!(!rules.is_ignored_dir("/assets"));
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_files_prunes_ignored_link_loop() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "home");
        write(temp.path(), "node_modules/pkg/index.js", "module");
        std::os::unix::fs::symlink("..", temp.path().join("node_modules/pkg/loop")).unwrap();

        let rules = IgnoreRules::from_patterns(temp.path(), &["**/node_modules/**"]).unwrap();
        let catalog = build_catalog(temp.path(), &rules, &Cancellation::new()).unwrap();

        let keys: Vec<_> = catalog.manifest.keys().cloned().collect();
        assert_eq!(keys, vec!["/index.html"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_files_prunes_ignored_dangling_link() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "home");
        fs::create_dir_all(temp.path().join(".cache")).unwrap();
        std::os::unix::fs::symlink("gone", temp.path().join(".cache/stale")).unwrap();
        std::os::unix::fs::symlink("gone", temp.path().join(".stale")).unwrap();

        let rules = IgnoreRules::from_patterns(temp.path(), &["**/.*"]).unwrap();
        let catalog = build_catalog(temp.path(), &rules, &Cancellation::new()).unwrap();

        let keys: Vec<_> = catalog.manifest.keys().cloned().collect();
        assert_eq!(keys, vec!["/index.html"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_files_dangling_link_outside_ignore_fails() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "home");
        std::os::unix::fs::symlink("gone", temp.path().join("broken")).unwrap();

        let result = walk_files(temp.path(), &IgnoreRules::empty(), &Cancellation::new());
        assert!(matches!(result, Err(DeployError::Walk { .. })));
    }

    #[test]
    fn test_walk_files_does_not_list_pruned_directory() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "home");
        write(temp.path(), "drafts/post.html", "draft");

        let rules = IgnoreRules::from_patterns(temp.path(), &["drafts/"]).unwrap();
        let files = walk_files(temp.path(), &rules, &Cancellation::new()).unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.site_path.as_str()).collect();
        assert_eq!(paths, vec!["/index.html"]);
    }

    // ==================== build_catalog tests ====================

    #[test]
    fn test_build_catalog_two_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "<h1>Hi</h1>");
        write(temp.path(), "style.css", "body{}");

        let catalog =
            build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();

        let keys: Vec<_> = catalog.manifest.keys().cloned().collect();
        assert_eq!(keys, vec!["/index.html", "/style.css"]);

        let h1 = &catalog.manifest["/index.html"];
        let h2 = &catalog.manifest["/style.css"];
        assert_ne!(h1, h2);
        assert_eq!(h1, &address_bytes(b"<h1>Hi</h1>").unwrap().hash);
        assert!(catalog.store.contains(h1));
        assert!(catalog.store.contains(h2));
    }

    #[test]
    fn test_build_catalog_is_deterministic() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "<h1>Hi</h1>");
        write(temp.path(), "js/app.js", "console.log(1)");
        write(temp.path(), "img/logo.svg", "<svg/>");

        let first =
            build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();
        let second =
            build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();

        assert_eq!(first.manifest, second.manifest);
    }

    #[test]
    fn test_build_catalog_dedups_identical_content() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a/logo.png", "same bytes");
        write(temp.path(), "b/logo.png", "same bytes");
        write(temp.path(), "other.txt", "different");

        let catalog =
            build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();

        assert_eq!(catalog.manifest.len(), 3);
        assert_eq!(catalog.manifest["/a/logo.png"], catalog.manifest["/b/logo.png"]);
        assert_eq!(catalog.store.len(), 2);
    }

    #[test]
    fn test_build_catalog_excludes_ignored_everywhere() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "index.html", "keep");
        write(temp.path(), "secret.env", "ignored content");
        write(temp.path(), "node_modules/x/y.js", "also ignored");

        let rules =
            IgnoreRules::from_patterns(temp.path(), &["*.env", "**/node_modules/**"]).unwrap();
        let catalog = build_catalog(temp.path(), &rules, &Cancellation::new()).unwrap();

        assert_eq!(catalog.manifest.len(), 1);
        assert!(catalog.manifest.contains_key("/index.html"));

        let ignored_hash = address_bytes(b"ignored content").unwrap().hash;
        assert!(!catalog.store.contains(&ignored_hash));
        assert_eq!(catalog.store.len(), 1);
    }

    #[test]
    fn test_build_catalog_manifest_hashes_all_in_store() {
        let temp = TempDir::new().unwrap();
        for i in 0..20 {
            write(temp.path(), &format!("dir{}/f{}.txt", i % 3, i), &format!("c{}", i % 7));
        }

        let catalog =
            build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();

        assert_eq!(catalog.manifest.len(), 20);
        let distinct: HashSet<_> = catalog.manifest.values().collect();
        assert_eq!(distinct.len(), catalog.store.len());
        assert!(catalog.manifest.values().all(|h| catalog.store.contains(h)));
    }

    #[test]
    fn test_build_catalog_empty_root() {
        let temp = TempDir::new().unwrap();
        let catalog =
            build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new()).unwrap();
        assert!(catalog.manifest.is_empty());
        assert!(catalog.store.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_catalog_unreadable_file_aborts() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        write(temp.path(), "ok.html", "fine");
        write(temp.path(), "locked.html", "secret");
        let locked = temp.path().join("locked.html");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read anything; nothing to assert in that case
        if fs::read(&locked).is_ok() {
            return;
        }

        let result = build_catalog(temp.path(), &IgnoreRules::empty(), &Cancellation::new());
        match result {
            Err(DeployError::Hash { path, .. }) => assert_eq!(path, "/locked.html"),
            other => panic!("expected hash error, got {other:?}"),
        }
    }

    #[test]
    fn test_content_store_keeps_first_payload() {
        let mut store = ContentStore::default();
        let hash = address_bytes(b"x").unwrap().hash;
        store.insert(hash.clone(), vec![1, 2, 3]);
        store.insert(hash.clone(), vec![9]);
        assert_eq!(store.get(&hash).unwrap(), &[1, 2, 3]);
        assert_eq!(store.total_bytes(), 3);
    }
}

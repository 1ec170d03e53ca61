//! Locating the bytes behind a file record.
//!
//! Two storage schemes exist on these devices: the legacy content store,
//! sharded by the first characters of the content ID, and the per-user tree
//! where files keep their original names under arbitrary album folders. Each
//! scheme is a [`LocateStrategy`]; [`PathResolver`] tries them in order and
//! memoizes the answer for the lifetime of one run.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::{FileRecord, FilesystemMapping, Located, Resolution, StrategyKind};

/// One way of finding a record's bytes on disk.
pub trait LocateStrategy {
    fn kind(&self) -> StrategyKind;

    /// Whether this strategy should be consulted for `record` at all.
    fn applies_to(&self, record: &FileRecord) -> bool;

    /// An existing file for `record`, if this strategy can find one.
    fn locate(&self, record: &FileRecord) -> Option<PathBuf>;
}

/// A content ID is used as a path component, so anything that could climb
/// out of the store is refused.
fn safe_component(s: &str) -> bool {
    let mut components = Path::new(s).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// `files/<c0>/<cid>`, then `files/<c0c1>/<c2c3>/<cid>`, then `files/<cid>`.
pub struct LegacyShardStrategy {
    files_root: PathBuf,
}

impl LegacyShardStrategy {
    pub fn new(files_root: impl Into<PathBuf>) -> Self {
        Self {
            files_root: files_root.into(),
        }
    }

    pub fn candidates(&self, content_id: &str) -> Vec<PathBuf> {
        let cid = content_id.trim();
        if cid.is_empty() || !safe_component(cid) {
            return Vec::new();
        }
        let chars: Vec<char> = cid.chars().collect();
        let mut out = Vec::with_capacity(3);

        let first: String = chars[..1].iter().collect();
        out.push(self.files_root.join(first).join(cid));

        if chars.len() >= 4 {
            let a: String = chars[..2].iter().collect();
            let b: String = chars[2..4].iter().collect();
            out.push(self.files_root.join(a).join(b).join(cid));
        }

        out.push(self.files_root.join(cid));
        out
    }
}

impl LocateStrategy for LegacyShardStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LegacyShard
    }

    fn applies_to(&self, record: &FileRecord) -> bool {
        record.uses_legacy_storage()
    }

    fn locate(&self, record: &FileRecord) -> Option<PathBuf> {
        self.candidates(&record.content_id)
            .into_iter()
            .find(|p| p.is_file())
    }
}

type NameIndex = HashMap<String, PathBuf>;

/// `<user_storage_root>/<account>/**/<name>`.
///
/// Each account directory is walked once, on first use. When the same file
/// name occurs in several folders, the one in the lexicographically smallest
/// folder is canonical.
pub struct UserStorageStrategy {
    /// storage id -> candidate account directories
    accounts: HashMap<String, Vec<PathBuf>>,
    index: RefCell<HashMap<PathBuf, Rc<NameIndex>>>,
}

impl UserStorageStrategy {
    pub fn new(root: impl Into<PathBuf>, filesystems: &[FilesystemMapping]) -> Self {
        let root = root.into();
        let mut accounts: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for fs in filesystems {
            let dirs = accounts.entry(fs.id.clone()).or_default();
            if safe_component(&fs.name) {
                dirs.push(root.join(&fs.name));
            }
            // The recorded mount path ends in the account directory, which
            // some firmware names differently from the account.
            let tail = fs
                .path
                .as_deref()
                .and_then(|p| Path::new(p.trim_end_matches('/')).file_name())
                .map(|n| root.join(n));
            if let Some(tail) = tail {
                if !dirs.contains(&tail) {
                    dirs.push(tail);
                }
            }
        }
        Self {
            accounts,
            index: RefCell::new(HashMap::new()),
        }
    }

    fn index_for(&self, dir: &Path) -> Rc<NameIndex> {
        if let Some(idx) = self.index.borrow().get(dir) {
            return Rc::clone(idx);
        }
        let idx = Rc::new(build_name_index(dir));
        self.index
            .borrow_mut()
            .insert(dir.to_path_buf(), Rc::clone(&idx));
        idx
    }
}

fn build_name_index(dir: &Path) -> NameIndex {
    let mut index: NameIndex = HashMap::new();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "account directory missing");
        return index;
    }
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry in user storage");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.into_path();
        let replace = index
            .get(&name)
            .map_or(true, |existing| path.parent() < existing.parent());
        if replace {
            index.insert(name, path);
        }
    }
    debug!(dir = %dir.display(), files = index.len(), "indexed account directory");
    index
}

impl LocateStrategy for UserStorageStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UserStorage
    }

    fn applies_to(&self, record: &FileRecord) -> bool {
        !record.uses_legacy_storage()
    }

    fn locate(&self, record: &FileRecord) -> Option<PathBuf> {
        let dirs = self.accounts.get(&record.storage_id)?;
        dirs.iter()
            .find_map(|dir| self.index_for(dir).get(&record.name).cloned())
    }
}

/// Ordered strategies plus a per-run memo.
pub struct PathResolver {
    strategies: Vec<Box<dyn LocateStrategy>>,
    cache: RefCell<HashMap<(String, String, String), Resolution>>,
}

impl PathResolver {
    /// Legacy store first, then per-user storage when a root is known.
    pub fn new(
        files_root: &Path,
        user_storage_root: Option<&Path>,
        filesystems: &[FilesystemMapping],
    ) -> Self {
        let mut strategies: Vec<Box<dyn LocateStrategy>> =
            vec![Box::new(LegacyShardStrategy::new(files_root))];
        if let Some(root) = user_storage_root {
            strategies.push(Box::new(UserStorageStrategy::new(root, filesystems)));
        }
        Self::with_strategies(strategies)
    }

    pub fn with_strategies(strategies: Vec<Box<dyn LocateStrategy>>) -> Self {
        Self {
            strategies,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Where `record`'s bytes are, or `NotFound`. Never fails; the same
    /// `(storage_id, content_id, name)` always gets the same answer.
    pub fn resolve(&self, record: &FileRecord) -> Resolution {
        if !record.is_recoverable() {
            return Resolution::NotFound;
        }
        let key = (
            record.storage_id.clone(),
            record.content_id.clone(),
            record.name.clone(),
        );
        if let Some(hit) = self.cache.borrow().get(&key) {
            return hit.clone();
        }

        let resolution = self
            .strategies
            .iter()
            .filter(|s| s.applies_to(record))
            .find_map(|s| {
                s.locate(record).map(|path| Located {
                    path,
                    via: s.kind(),
                })
            })
            .map(Resolution::Found)
            .unwrap_or(Resolution::NotFound);

        if !resolution.is_found() {
            debug!(id = %record.id, name = %record.name, "no physical file");
        }
        self.cache.borrow_mut().insert(key, resolution.clone());
        resolution
    }

    /// Resolve and store the answer on the record itself.
    pub fn resolve_into<'r>(&self, record: &'r FileRecord) -> &'r Resolution {
        if let Some(existing) = record.resolution() {
            return existing;
        }
        record.set_resolution(self.resolve(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(id: &str, cid: &str, name: &str, storage: &str) -> FileRecord {
        let mut r = FileRecord::new(id, cid, name);
        r.mime_type = "image/jpeg".into();
        r.storage_id = storage.into();
        r
    }

    fn write(path: &Path, body: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn legacy_candidates_in_order() {
        let s = LegacyShardStrategy::new("/files");
        assert_eq!(
            s.candidates("jT9JduP8"),
            vec![
                PathBuf::from("/files/j/jT9JduP8"),
                PathBuf::from("/files/jT/9J/jT9JduP8"),
                PathBuf::from("/files/jT9JduP8"),
            ]
        );
        assert_eq!(s.candidates("ab").len(), 2);
        assert!(s.candidates("../etc").is_empty());
        assert!(s.candidates("a/b").is_empty());
    }

    #[test]
    fn legacy_handles_multibyte_ids() {
        let s = LegacyShardStrategy::new("/files");
        let c = s.candidates("ééab");
        assert_eq!(c[0], PathBuf::from("/files/é/ééab"));
        assert_eq!(c[1], PathBuf::from("/files/éé/ab/ééab"));
    }

    #[test]
    fn resolves_secondary_legacy_layout() {
        let tmp = TempDir::new().unwrap();
        let files = tmp.path().join("files");
        write(&files.join("ab/cd/abcdef"), b"x");

        let resolver = PathResolver::new(&files, None, &[]);
        let rec = record("1", "abcdef", "a.jpg", "local");
        assert_eq!(
            resolver.resolve(&rec).path(),
            Some(files.join("ab/cd/abcdef").as_path())
        );
    }

    #[test]
    fn user_storage_tie_break_is_lexicographic() {
        let tmp = TempDir::new().unwrap();
        let files = tmp.path().join("files");
        let users = tmp.path().join("userStorage");
        write(&users.join("auth0|u1/Zoo/IMG_1.jpg"), b"z");
        write(&users.join("auth0|u1/Beach/IMG_1.jpg"), b"b");
        write(&users.join("auth0|u1/Beach/2020/IMG_2.jpg"), b"c");

        let mapping = FilesystemMapping {
            id: "fs1".into(),
            name: "auth0|u1".into(),
            path: Some("/data/wd/diskVolume0/userStorage/auth0|u1".into()),
        };
        let resolver = PathResolver::new(&files, Some(&users), &[mapping]);

        let rec = record("1", "cid1", "IMG_1.jpg", "fs1");
        let found = resolver.resolve(&rec);
        assert_eq!(found.path(), Some(users.join("auth0|u1/Beach/IMG_1.jpg").as_path()));

        let nested = record("2", "cid2", "IMG_2.jpg", "fs1");
        assert!(resolver.resolve(&nested).is_found());

        let unknown_account = record("3", "cid3", "IMG_1.jpg", "fs9");
        assert_eq!(resolver.resolve(&unknown_account), Resolution::NotFound);
    }

    #[test]
    fn resolution_is_idempotent_and_memoized() {
        let tmp = TempDir::new().unwrap();
        let files = tmp.path().join("files");
        write(&files.join("a/abc"), b"x");

        let resolver = PathResolver::new(&files, None, &[]);
        let found = record("1", "abc", "a.jpg", "");
        let missing = record("2", "zzz", "b.jpg", "");

        let first = (resolver.resolve(&found), resolver.resolve(&missing));
        let second = (resolver.resolve(&found), resolver.resolve(&missing));
        assert_eq!(first, second);
        assert_eq!(resolver.cache.borrow().len(), 2);

        let r = resolver.resolve_into(&found);
        assert!(matches!(r, Resolution::Found(Located { via: StrategyKind::LegacyShard, .. })));
    }

    #[test]
    fn organizational_records_never_resolve() {
        let tmp = TempDir::new().unwrap();
        let files = tmp.path().join("files");
        write(&files.join("a/abc"), b"x");

        let resolver = PathResolver::new(&files, None, &[]);
        let mut dir = record("1", "abc", "Photos", "");
        dir.mime_type = "application/x.wd.dir".into();
        assert_eq!(resolver.resolve(&dir), Resolution::NotFound);
    }
}

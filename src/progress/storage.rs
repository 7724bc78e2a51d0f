//! Durable progression storage.
//!
//! Backends only see composite keys: (user, language) for solved sets and
//! (user, language, question) for saved sources.

use crate::error::ProgressionStorageError;
use crate::model::{Language, QuestionId, UserId};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Longest id stored under its hex form: 1 + 2 * 120 bytes stays below the
/// usual 255-byte limit on a file name.
const MAX_HEX_ID_BYTES: usize = 120;
const USER_ID_FILE: &str = "user_id";

pub trait ProgressBackend: Send + Sync {
    fn load_solved(&self, user: &UserId, language: Language) -> Result<BTreeSet<QuestionId>, ProgressionStorageError>;

    fn store_solved(
        &self,
        user: &UserId,
        language: Language,
        solved: &BTreeSet<QuestionId>,
    ) -> Result<(), ProgressionStorageError>;

    fn load_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
    ) -> Result<Option<String>, ProgressionStorageError>;

    fn store_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
        source: &str,
    ) -> Result<(), ProgressionStorageError>;

    /// Drops the solved set and every saved source of (user, language).
    fn clear(&self, user: &UserId, language: Language) -> Result<(), ProgressionStorageError>;

    /// Users with stored progress in `language`.
    fn users(&self, language: Language) -> Result<Vec<UserId>, ProgressionStorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Volatile backend, for tests and single-run tools.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    solved: Mutex<HashMap<(UserId, Language), BTreeSet<QuestionId>>>,
    sources: Mutex<HashMap<(UserId, Language, QuestionId), String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressBackend for MemoryBackend {
    fn load_solved(&self, user: &UserId, language: Language) -> Result<BTreeSet<QuestionId>, ProgressionStorageError> {
        Ok(lock(&self.solved)
            .get(&(user.clone(), language))
            .cloned()
            .unwrap_or_default())
    }

    fn store_solved(
        &self,
        user: &UserId,
        language: Language,
        solved: &BTreeSet<QuestionId>,
    ) -> Result<(), ProgressionStorageError> {
        lock(&self.solved).insert((user.clone(), language), solved.clone());
        Ok(())
    }

    fn load_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
    ) -> Result<Option<String>, ProgressionStorageError> {
        Ok(lock(&self.sources)
            .get(&(user.clone(), language, question_id))
            .cloned())
    }

    fn store_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
        source: &str,
    ) -> Result<(), ProgressionStorageError> {
        lock(&self.sources).insert((user.clone(), language, question_id), source.to_string());
        Ok(())
    }

    fn clear(&self, user: &UserId, language: Language) -> Result<(), ProgressionStorageError> {
        lock(&self.solved).remove(&(user.clone(), language));
        lock(&self.sources).retain(|(u, l, _), _| !(u == user && *l == language));
        Ok(())
    }

    fn users(&self, language: Language) -> Result<Vec<UserId>, ProgressionStorageError> {
        Ok(lock(&self.solved)
            .keys()
            .filter(|(_, l)| *l == language)
            .map(|(u, _)| u.clone())
            .collect())
    }
}

/// One directory per (language, user):
///
/// ```text
/// <root>/<language>/u<hex user id>/solved.json
/// <root>/<language>/u<hex user id>/sources/<question id>.txt
/// ```
///
/// User ids are hex-encoded so that no two users map to the same path. Ids
/// too long for one path segment use `d<sha256 of the id>` instead, with the
/// raw id kept next to the data in a `user_id` file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user: &UserId, language: Language) -> PathBuf {
        self.root.join(language.as_str()).join(encode_user(user))
    }

    /// Digest directories must record whose data they hold.
    fn prepare_user_dir(&self, user: &UserId, language: Language) -> io::Result<()> {
        if user.as_str().len() <= MAX_HEX_ID_BYTES {
            return Ok(());
        }
        let path = self.user_dir(user, language).join(USER_ID_FILE);
        match path.try_exists()? {
            true => Ok(()),
            false => write_atomic(&path, user.as_str().as_bytes()),
        }
    }

    fn dir_user(&self, dir: &Path) -> Option<UserId> {
        let name = dir.file_name()?.to_str()?;
        if let Some(encoded) = name.strip_prefix('u') {
            let bytes = hex::decode(encoded).ok()?;
            return String::from_utf8(bytes).ok().map(UserId::new);
        }
        name.strip_prefix('d')?;
        fs::read_to_string(dir.join(USER_ID_FILE)).ok().map(UserId::new)
    }

    fn solved_path(&self, user: &UserId, language: Language) -> PathBuf {
        self.user_dir(user, language).join("solved.json")
    }

    fn source_path(&self, user: &UserId, language: Language, question_id: QuestionId) -> PathBuf {
        self.user_dir(user, language)
            .join("sources")
            .join(format!("{question_id}.txt"))
    }
}

fn storage_key(user: &UserId, language: Language) -> String {
    format!("{language}/{user}")
}

fn io_error(key: String) -> impl FnOnce(io::Error) -> ProgressionStorageError {
    move |source| ProgressionStorageError::Io { key, source }
}

fn encode_user(user: &UserId) -> String {
    let raw = user.as_str().as_bytes();
    if raw.len() <= MAX_HEX_ID_BYTES {
        format!("u{}", hex::encode(raw))
    } else {
        format!("d{}", hex::encode(Sha256::digest(raw)))
    }
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

impl ProgressBackend for FileBackend {
    fn load_solved(&self, user: &UserId, language: Language) -> Result<BTreeSet<QuestionId>, ProgressionStorageError> {
        let key = storage_key(user, language);
        let Some(content) = read_optional(&self.solved_path(user, language)).map_err(io_error(key.clone()))? else {
            return Ok(BTreeSet::new());
        };
        let ids: Vec<QuestionId> =
            serde_json::from_str(&content).map_err(|source| ProgressionStorageError::Corrupt { key, source })?;
        Ok(ids.into_iter().collect())
    }

    fn store_solved(
        &self,
        user: &UserId,
        language: Language,
        solved: &BTreeSet<QuestionId>,
    ) -> Result<(), ProgressionStorageError> {
        let key = storage_key(user, language);
        let ids: Vec<QuestionId> = solved.iter().copied().collect();
        let json = serde_json::to_vec(&ids).map_err(|source| ProgressionStorageError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.prepare_user_dir(user, language)
            .and_then(|()| write_atomic(&self.solved_path(user, language), &json))
            .map_err(io_error(key))
    }

    fn load_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
    ) -> Result<Option<String>, ProgressionStorageError> {
        read_optional(&self.source_path(user, language, question_id))
            .map_err(io_error(format!("{}/{question_id}", storage_key(user, language))))
    }

    fn store_source(
        &self,
        user: &UserId,
        language: Language,
        question_id: QuestionId,
        source: &str,
    ) -> Result<(), ProgressionStorageError> {
        self.prepare_user_dir(user, language)
            .and_then(|()| write_atomic(&self.source_path(user, language, question_id), source.as_bytes()))
            .map_err(io_error(format!("{}/{question_id}", storage_key(user, language))))
    }

    fn clear(&self, user: &UserId, language: Language) -> Result<(), ProgressionStorageError> {
        match fs::remove_dir_all(self.user_dir(user, language)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(storage_key(user, language))(err)),
        }
    }

    fn users(&self, language: Language) -> Result<Vec<UserId>, ProgressionStorageError> {
        let dir = self.root.join(language.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(language.to_string())(err)),
        };

        let mut users = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(language.to_string()))?;
            if let Some(user) = self.dir_user(&entry.path()) {
                users.push(user);
            }
        }
        users.sort();
        Ok(users)
    }
}

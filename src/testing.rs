//! In-memory gateways for unit tests

use crate::gateway::{GatewayError, GatewayFuture};
use crate::github::{
    EntryKind, FileContent, FileWrite, RepoId, RepositoryEntry, RepositoryGateway, WriteOutcome,
};
use crate::llm::{ChatGateway, ChatMessage};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// Repository
// ============================================================================

/// File tree keyed by path; every stored version gets a fresh sha.
#[derive(Default)]
pub struct FakeRepository {
    files: Mutex<BTreeMap<String, (String, String)>>,
    next_sha: AtomicU64,
    read_failure: Mutex<Option<GatewayError>>,
    write_failure: Mutex<Option<GatewayError>>,
    writes: Mutex<Vec<FileWrite>>,
    deletes: Mutex<Vec<String>>,
    reads: AtomicU64,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.put(path, content);
        self
    }

    fn sha(&self) -> String {
        format!("sha-{}", self.next_sha.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Store `content` as if someone else pushed it; returns the new sha.
    pub fn put(&self, path: &str, content: &str) -> String {
        let sha = self.sha();
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), (content.to_string(), sha.clone()));
        sha
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).map(|(c, _)| c.clone())
    }

    pub fn token(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).map(|(_, s)| s.clone())
    }

    pub fn fail_reads(&self, err: Option<GatewayError>) {
        *self.read_failure.lock().unwrap() = err;
    }

    pub fn fail_writes(&self, err: Option<GatewayError>) {
        *self.write_failure.lock().unwrap() = err;
    }

    pub fn writes(&self) -> Vec<FileWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.files
            .lock()
            .unwrap()
            .keys()
            .any(|p| p.starts_with(&prefix))
    }

    fn check_read(&self) -> Result<(), GatewayError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.read_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_write(&self) -> Result<(), GatewayError> {
        match self.write_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn listing(&self, dir: &str) -> Vec<RepositoryEntry> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let mut out: BTreeMap<String, RepositoryEntry> = BTreeMap::new();
        for (path, (content, _)) in self.files.lock().unwrap().iter() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, kind) = match rest.split_once('/') {
                Some((name, _)) => (name, EntryKind::Dir),
                None => (rest, EntryKind::File),
            };
            out.entry(name.to_string()).or_insert(RepositoryEntry {
                name: name.to_string(),
                path: format!("{}{}", prefix, name),
                kind,
                size: if kind == EntryKind::File {
                    content.len() as u64
                } else {
                    0
                },
            });
        }
        out.into_values().collect()
    }
}

impl RepositoryGateway for FakeRepository {
    fn list_directory<'a>(
        &'a self,
        _repo: &'a RepoId,
        path: &'a str,
    ) -> GatewayFuture<'a, Vec<RepositoryEntry>> {
        Box::pin(async move {
            self.check_read()?;
            let entries = self.listing(path);
            if entries.is_empty() && !path.is_empty() {
                return Err(GatewayError::not_found("Not Found"));
            }
            Ok(entries)
        })
    }

    fn read_file<'a>(&'a self, _repo: &'a RepoId, path: &'a str) -> GatewayFuture<'a, FileContent> {
        Box::pin(async move {
            self.check_read()?;
            if self.is_dir(path) {
                return Err(GatewayError::generic(format!("{} is a directory", path)));
            }
            let found = self.files.lock().unwrap().get(path).cloned();
            found
                .map(|(content, sha)| FileContent {
                    content,
                    version_token: sha,
                })
                .ok_or_else(|| GatewayError::not_found("Not Found"))
        })
    }

    fn write_file<'a>(
        &'a self,
        _repo: &'a RepoId,
        write: &'a FileWrite,
    ) -> GatewayFuture<'a, WriteOutcome> {
        Box::pin(async move {
            self.check_write()?;
            let current = self.token(&write.path);
            match (&current, &write.version_token) {
                (Some(cur), Some(given)) if cur != given => {
                    return Err(GatewayError::conflict(format!(
                        "{} does not match {}",
                        write.path, given
                    )));
                }
                (Some(_), None) => {
                    return Err(GatewayError::conflict("\"sha\" wasn't supplied."));
                }
                (None, Some(_)) => return Err(GatewayError::not_found("Not Found")),
                _ => {}
            }
            self.writes.lock().unwrap().push(write.clone());
            let sha = self.put(&write.path, &write.content);
            Ok(WriteOutcome {
                new_version_token: sha,
            })
        })
    }

    fn delete_file<'a>(
        &'a self,
        _repo: &'a RepoId,
        path: &'a str,
        _message: &'a str,
        version_token: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.check_write()?;
            match self.token(path) {
                None => Err(GatewayError::not_found("Not Found")),
                Some(cur) if cur != version_token => Err(GatewayError::conflict(format!(
                    "{} does not match {}",
                    path, version_token
                ))),
                Some(_) => {
                    self.files.lock().unwrap().remove(path);
                    self.deletes.lock().unwrap().push(path.to_string());
                    Ok(())
                }
            }
        })
    }
}

// ============================================================================
// Chat
// ============================================================================

pub enum Reply {
    Text(String),
    Fail(GatewayError),
    /// Wait for the notify before answering
    Gated(Arc<Notify>, String),
}

/// Scripted chat gateway; replies are consumed in call order.
#[derive(Default)]
pub struct FakeChat {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.push(Reply::Text(text.to_string()));
        self
    }

    pub fn fail(self, err: GatewayError) -> Self {
        self.push(Reply::Fail(err));
        self
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ChatGateway for FakeChat {
    fn complete<'a>(
        &'a self,
        model_id: &'a str,
        messages: &'a [ChatMessage],
    ) -> GatewayFuture<'a, String> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((model_id.to_string(), messages.to_vec()));
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Gated(gate, text)) => {
                    gate.notified().await;
                    Ok(text)
                }
                None => Err(GatewayError::generic("no scripted reply")),
            }
        })
    }
}

//! Embedded SQLite store.
//!
//! One connection, WAL mode, epoch-millisecond timestamps. The ledger
//! tables are write-once: appends are inserted and never updated or
//! deleted, and per-file sequence numbers are assigned inside the write
//! transaction. Claim creation runs its whole check-and-insert sequence
//! in a single transaction because "no active claim exists" is a
//! time-dependent predicate that a uniqueness constraint cannot express.

mod error;

pub use error::StoreError;
use error::Result;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use uuid::Uuid;

use crate::domain::append::{Append, AppendKind};
use crate::domain::key::{CapabilityKey, Permission};
use crate::domain::scope::{Scope, prefix_matches};

const DEFAULT_QUOTA_BYTES: i64 = 64 * 1024 * 1024;

#[derive(Debug)]
pub struct SqliteStore {
  conn: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRow {
  pub id: String,
  pub name: String,
  pub claimed: bool,
  pub quota_bytes: i64,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
  pub id: String,
  pub workspace_id: String,
  pub path: String,
  pub content: String,
  pub deleted_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

/// A claim plus everything needed to derive its status: the effective
/// deadline (latest renew wins) and the first terminal entry, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRow {
  pub claim_id: String,
  pub task_id: String,
  pub file_path: String,
  pub author: String,
  pub created_at: DateTime<Utc>,
  pub deadline: DateTime<Utc>,
  pub terminal: Option<AppendKind>,
}

#[derive(Debug, Clone)]
pub struct AppendInsert {
  pub workspace_id: String,
  pub path: String,
  pub author: String,
  pub kind: AppendKind,
  pub ref_id: Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
  pub content: String,
  pub content_preview: String,
  pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ClaimInsert {
  pub workspace_id: String,
  pub path: String,
  pub author: String,
  pub task_id: String,
  pub expires_at: DateTime<Utc>,
  pub now: DateTime<Utc>,
  /// Max concurrent active claims for this author inside `wip_scope`.
  pub wip_limit: usize,
  /// Path prefix the WIP count is bound to; `None` counts the whole
  /// workspace.
  pub wip_scope: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppendFilters {
  pub kind: Option<AppendKind>,
  pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
  pub key_hash: String,
  pub workspace_id: String,
  pub status: String,
  pub progress: i64,
  pub result: Option<String>,
  pub error: Option<String>,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

pub fn to_ms(t: DateTime<Utc>) -> i64 {
  t.timestamp_millis()
}

pub fn from_ms(ms: i64) -> DateTime<Utc> {
  Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl SqliteStore {
  pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
    if let Some(parent) = db_path.as_ref().parent() {
      std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    Self::from_connection(conn)
  }

  /// In-memory store for tests.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn.busy_timeout(Duration::from_secs(5))?;
    let store = Self { conn };
    store.migrate()?;
    Ok(store)
  }

  fn migrate(&self) -> Result<()> {
    self.conn.execute_batch(
      r#"
      PRAGMA journal_mode=WAL;
      PRAGMA synchronous=NORMAL;
      PRAGMA foreign_keys=ON;

      CREATE TABLE IF NOT EXISTS workspaces (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        claimed INTEGER NOT NULL DEFAULT 0,
        quota_bytes INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
      );

      CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspaces(id),
        path TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        deleted_at_ms INTEGER,
        created_at_ms INTEGER NOT NULL,
        UNIQUE(workspace_id, path)
      );

      CREATE TABLE IF NOT EXISTS appends (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL REFERENCES files(id),
        seq INTEGER NOT NULL,
        author TEXT NOT NULL,
        kind TEXT NOT NULL,
        ref_id TEXT,
        expires_at_ms INTEGER,
        content TEXT NOT NULL DEFAULT '',
        content_preview TEXT NOT NULL DEFAULT '',
        created_at_ms INTEGER NOT NULL,
        UNIQUE(file_id, seq)
      );
      CREATE INDEX IF NOT EXISTS idx_appends_ref ON appends(ref_id);
      CREATE INDEX IF NOT EXISTS idx_appends_file_kind ON appends(file_id, kind);

      CREATE TABLE IF NOT EXISTS capability_keys (
        key_hash TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspaces(id),
        scope_kind TEXT NOT NULL,
        scope_path TEXT NOT NULL,
        permission TEXT NOT NULL,
        expires_at_ms INTEGER,
        revoked_at_ms INTEGER,
        created_at_ms INTEGER NOT NULL
      );

      CREATE TABLE IF NOT EXISTS api_keys (
        key_hash TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspaces(id),
        permission TEXT NOT NULL,
        created_at_ms INTEGER NOT NULL
      );

      CREATE TABLE IF NOT EXISTS jobs (
        key_hash TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL REFERENCES workspaces(id),
        status TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        result TEXT,
        error TEXT,
        expires_at_ms INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
      );
      "#,
    )?;
    Ok(())
  }

  // ---- workspaces ----

  pub fn create_workspace(&mut self, name: &str, now: DateTime<Utc>) -> Result<WorkspaceRow> {
    let id = Uuid::new_v4().to_string();
    self.conn.execute(
      "INSERT INTO workspaces (id, name, claimed, quota_bytes, created_at_ms)
       VALUES (?1, ?2, 0, ?3, ?4)",
      params![id, name, DEFAULT_QUOTA_BYTES, to_ms(now)],
    )?;
    Ok(WorkspaceRow {
      id,
      name: name.to_string(),
      claimed: false,
      quota_bytes: DEFAULT_QUOTA_BYTES,
      created_at: now,
    })
  }

  pub fn workspace(&self, id: &str) -> Result<Option<WorkspaceRow>> {
    let row = self
      .conn
      .query_row(
        "SELECT id, name, claimed, quota_bytes, created_at_ms FROM workspaces WHERE id = ?1",
        params![id],
        |r| {
          Ok(WorkspaceRow {
            id: r.get(0)?,
            name: r.get(1)?,
            claimed: r.get::<_, i64>(2)? != 0,
            quota_bytes: r.get(3)?,
            created_at: from_ms(r.get(4)?),
          })
        },
      )
      .optional()?;
    Ok(row)
  }

  /// Anonymous → owned, exactly once.
  pub fn claim_workspace(&mut self, id: &str) -> Result<()> {
    let ws = self.workspace(id)?.ok_or(StoreError::MissingRow)?;
    if ws.claimed {
      return Err(StoreError::WorkspaceAlreadyClaimed);
    }
    self
      .conn
      .execute("UPDATE workspaces SET claimed = 1 WHERE id = ?1 AND claimed = 0", params![id])?;
    Ok(())
  }

  // ---- capability keys ----

  pub fn insert_capability_key(&mut self, key: &CapabilityKey) -> Result<()> {
    self.conn.execute(
      "INSERT INTO capability_keys
         (key_hash, workspace_id, scope_kind, scope_path, permission,
          expires_at_ms, revoked_at_ms, created_at_ms)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
      params![
        key.key_hash,
        key.workspace_id,
        key.scope.kind(),
        key.scope.path(),
        key.permission.as_str(),
        key.expires_at.map(to_ms),
        key.revoked_at.map(to_ms),
        to_ms(key.created_at),
      ],
    )?;
    Ok(())
  }

  pub fn capability_key(&self, key_hash: &str) -> Result<Option<CapabilityKey>> {
    let row = self
      .conn
      .query_row(
        "SELECT key_hash, workspace_id, scope_kind, scope_path, permission,
                expires_at_ms, revoked_at_ms, created_at_ms
         FROM capability_keys WHERE key_hash = ?1",
        params![key_hash],
        |r| {
          let scope_kind: String = r.get(2)?;
          let scope_path: String = r.get(3)?;
          let permission: String = r.get(4)?;
          Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            scope_kind,
            scope_path,
            permission,
            r.get::<_, Option<i64>>(5)?,
            r.get::<_, Option<i64>>(6)?,
            r.get::<_, i64>(7)?,
          ))
        },
      )
      .optional()?;

    let Some((key_hash, workspace_id, scope_kind, scope_path, permission, exp, rev, created)) = row
    else {
      return Ok(None);
    };
    let scope =
      Scope::from_kind(&scope_kind, &scope_path).ok_or(StoreError::MissingRow)?;
    let permission = Permission::parse(&permission).ok_or(StoreError::MissingRow)?;
    Ok(Some(CapabilityKey {
      key_hash,
      workspace_id,
      scope,
      permission,
      expires_at: exp.map(from_ms),
      revoked_at: rev.map(from_ms),
      created_at: from_ms(created),
    }))
  }

  /// Revoked keys stay revoked; a second revocation keeps the first
  /// timestamp.
  pub fn revoke_capability_key(&mut self, key_hash: &str, now: DateTime<Utc>) -> Result<()> {
    let changed = self.conn.execute(
      "UPDATE capability_keys SET revoked_at_ms = ?2
       WHERE key_hash = ?1 AND revoked_at_ms IS NULL",
      params![key_hash, to_ms(now)],
    )?;
    let _ = changed;
    Ok(())
  }

  // ---- api keys ----

  pub fn insert_api_key(
    &mut self,
    key_hash: &str,
    workspace_id: &str,
    permission: Permission,
    now: DateTime<Utc>,
  ) -> Result<()> {
    self.conn.execute(
      "INSERT INTO api_keys (key_hash, workspace_id, permission, created_at_ms)
       VALUES (?1, ?2, ?3, ?4)",
      params![key_hash, workspace_id, permission.as_str(), to_ms(now)],
    )?;
    Ok(())
  }

  // ---- files ----

  pub fn file_by_path(&self, workspace_id: &str, path: &str) -> Result<Option<FileRow>> {
    file_by_path_conn(&self.conn, workspace_id, path)
  }

  // ---- ledger ----

  /// Append an entry. The whole operation (file get-or-create, ref check,
  /// sequence assignment, insert, content fold) is one transaction, so
  /// concurrent appends to the same file cannot collide on `seq`.
  ///
  /// `claim` entries must go through [`SqliteStore::insert_claim`]
  /// instead; this method only enforces the structural ref rules for
  /// renew and terminal kinds.
  pub fn append_entry(&mut self, req: AppendInsert) -> Result<Append> {
    debug_assert!(req.kind != AppendKind::Claim, "claims go through insert_claim");
    let tx = self.conn.transaction()?;

    let file = match file_by_path_conn(&tx, &req.workspace_id, &req.path)? {
      Some(f) => f,
      None if req.kind.ref_target().is_none() => {
        create_file_tx(&tx, &req.workspace_id, &req.path, req.now)?
      }
      None => return Err(StoreError::FileMissing),
    };

    if let Some(expected) = req.kind.ref_target() {
      let ref_id = req.ref_id.as_deref().ok_or_else(|| {
        StoreError::RefMissing(String::new())
      })?;
      let target = append_in_file_tx(&tx, &file.id, ref_id)?
        .ok_or_else(|| StoreError::RefMissing(ref_id.to_string()))?;
      if target.kind != expected {
        return Err(StoreError::RefKindMismatch { expected });
      }
      if req.kind == AppendKind::Renew {
        ensure_claim_alive_tx(&tx, &target, req.now)?;
      }
      if req.kind.is_terminal() && terminal_for_claim_tx(&tx, &target.id)?.is_some() {
        return Err(StoreError::ClaimTerminal);
      }
    }

    let stored = insert_append_tx(&tx, &file.id, &req)?;

    if req.kind.is_content_bearing() && !req.content.is_empty() {
      fold_content_tx(&tx, &file.id, &file.content, &req.content)?;
    }

    tx.commit()?;
    Ok(stored)
  }

  /// Atomic claim creation. Task resolution, the active-claim check, the
  /// WIP count, and the insert run in one transaction: two racing claim
  /// requests for the same task serialize here and exactly one succeeds.
  pub fn insert_claim(&mut self, req: ClaimInsert) -> Result<Append> {
    let tx = self.conn.transaction()?;

    let file = file_by_path_conn(&tx, &req.workspace_id, &req.path)?
      .ok_or(StoreError::FileMissing)?;
    let task = append_in_file_tx(&tx, &file.id, &req.task_id)?
      .ok_or(StoreError::TaskMissing)?;
    if task.kind != AppendKind::Task {
      return Err(StoreError::TaskMissing);
    }

    // One active claim per task; completed/blocked hold the task
    // terminally, cancelled releases it.
    for claim in claims_for_task_tx(&tx, &file.id, &task.id)? {
      match claim.terminal {
        Some(AppendKind::Response) | Some(AppendKind::Blocked) => {
          return Err(StoreError::TaskHeld);
        }
        Some(_) => {}
        None if req.now < claim.deadline => return Err(StoreError::AlreadyClaimed),
        None => {}
      }
    }

    // WIP limit: count the author's currently active claims bound to the
    // key's scope.
    let active = active_claims_for_author_tx(
      &tx,
      &req.workspace_id,
      &req.author,
      req.wip_scope.as_deref(),
      req.now,
    )?;
    if active.len() >= req.wip_limit {
      let retry_after_secs = active
        .iter()
        .map(|c| (c.deadline - req.now).num_seconds().max(0) as u64)
        .min();
      return Err(StoreError::WipExceeded { retry_after_secs });
    }

    let insert = AppendInsert {
      workspace_id: req.workspace_id.clone(),
      path: req.path.clone(),
      author: req.author.clone(),
      kind: AppendKind::Claim,
      ref_id: Some(task.id.clone()),
      expires_at: Some(req.expires_at),
      content: String::new(),
      content_preview: String::new(),
      now: req.now,
    };
    let stored = insert_append_tx(&tx, &file.id, &insert)?;
    tx.commit()?;
    Ok(stored)
  }

  pub fn appends_for_file(
    &self,
    workspace_id: &str,
    path: &str,
    filters: &AppendFilters,
  ) -> Result<Vec<Append>> {
    let file = self
      .file_by_path(workspace_id, path)?
      .ok_or(StoreError::FileMissing)?;
    let mut stmt = self.conn.prepare(
      "SELECT id, file_id, seq, author, kind, ref_id, expires_at_ms, content,
              content_preview, created_at_ms
       FROM appends WHERE file_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![file.id], row_to_append)?;
    let mut out = Vec::new();
    for row in rows {
      let append = row?;
      if let Some(kind) = filters.kind
        && append.kind != kind
      {
        continue;
      }
      if let Some(author) = &filters.author
        && &append.author != author
      {
        continue;
      }
      out.push(append);
    }
    Ok(out)
  }

  /// All claims in the workspace whose file path falls under `scope_path`
  /// (literal prefix), with effective deadlines and terminal markers.
  /// Status derivation stays in the caller.
  pub fn claims_under_scope(
    &self,
    workspace_id: &str,
    scope_path: Option<&str>,
    author: Option<&str>,
  ) -> Result<Vec<ClaimRow>> {
    let mut stmt = self.conn.prepare(
      "SELECT a.id, a.ref_id, f.path, a.author, a.created_at_ms,
              COALESCE(
                (SELECT MAX(r.expires_at_ms) FROM appends r
                  WHERE r.ref_id = a.id AND r.kind = 'renew'),
                a.expires_at_ms
              ),
              (SELECT t.kind FROM appends t
                WHERE t.ref_id = a.id
                  AND t.kind IN ('response', 'cancel', 'blocked')
                ORDER BY t.seq ASC LIMIT 1)
       FROM appends a
       JOIN files f ON f.id = a.file_id
       WHERE a.kind = 'claim'
         AND f.workspace_id = ?1
         AND f.deleted_at_ms IS NULL
       ORDER BY a.created_at_ms ASC",
    )?;
    let rows = stmt.query_map(params![workspace_id], |r| {
      Ok((
        r.get::<_, String>(0)?,
        r.get::<_, Option<String>>(1)?,
        r.get::<_, String>(2)?,
        r.get::<_, String>(3)?,
        r.get::<_, i64>(4)?,
        r.get::<_, Option<i64>>(5)?,
        r.get::<_, Option<String>>(6)?,
      ))
    })?;

    let mut out = Vec::new();
    for row in rows {
      let (claim_id, task_id, file_path, claim_author, created, deadline, terminal) = row?;
      if let Some(scope) = scope_path
        && !prefix_matches(&file_path, scope)
      {
        continue;
      }
      if let Some(want) = author
        && claim_author != want
      {
        continue;
      }
      out.push(ClaimRow {
        claim_id,
        task_id: task_id.unwrap_or_default(),
        file_path,
        author: claim_author,
        created_at: from_ms(created),
        deadline: from_ms(deadline.unwrap_or(created)),
        terminal: terminal.and_then(|k| AppendKind::parse(&k)),
      });
    }
    Ok(out)
  }

  // ---- jobs ----

  pub fn insert_job(&mut self, job: &JobRow) -> Result<()> {
    self.conn.execute(
      "INSERT INTO jobs
         (key_hash, workspace_id, status, progress, result, error,
          expires_at_ms, created_at_ms)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
      params![
        job.key_hash,
        job.workspace_id,
        job.status,
        job.progress,
        job.result,
        job.error,
        to_ms(job.expires_at),
        to_ms(job.created_at),
      ],
    )?;
    Ok(())
  }

  pub fn update_job(
    &mut self,
    key_hash: &str,
    status: &str,
    progress: i64,
    result: Option<&str>,
    error: Option<&str>,
  ) -> Result<()> {
    let changed = self.conn.execute(
      "UPDATE jobs SET status = ?2, progress = ?3, result = ?4, error = ?5
       WHERE key_hash = ?1",
      params![key_hash, status, progress, result, error],
    )?;
    if changed == 0 {
      return Err(StoreError::MissingRow);
    }
    Ok(())
  }

  pub fn job_by_key_hash(&self, key_hash: &str) -> Result<Option<JobRow>> {
    let row = self
      .conn
      .query_row(
        "SELECT key_hash, workspace_id, status, progress, result, error,
                expires_at_ms, created_at_ms
         FROM jobs WHERE key_hash = ?1",
        params![key_hash],
        |r| {
          Ok(JobRow {
            key_hash: r.get(0)?,
            workspace_id: r.get(1)?,
            status: r.get(2)?,
            progress: r.get(3)?,
            result: r.get(4)?,
            error: r.get(5)?,
            expires_at: from_ms(r.get(6)?),
            created_at: from_ms(r.get(7)?),
          })
        },
      )
      .optional()?;
    Ok(row)
  }
}

// ---- transaction helpers ----

fn file_by_path_conn(
  conn: &Connection,
  workspace_id: &str,
  path: &str,
) -> Result<Option<FileRow>> {
  let row = conn
    .query_row(
      "SELECT id, workspace_id, path, content, deleted_at_ms, created_at_ms
       FROM files
       WHERE workspace_id = ?1 AND path = ?2 AND deleted_at_ms IS NULL",
      params![workspace_id, path],
      |r| {
        Ok(FileRow {
          id: r.get(0)?,
          workspace_id: r.get(1)?,
          path: r.get(2)?,
          content: r.get(3)?,
          deleted_at: r.get::<_, Option<i64>>(4)?.map(from_ms),
          created_at: from_ms(r.get(5)?),
        })
      },
    )
    .optional()?;
  Ok(row)
}

fn create_file_tx(
  tx: &Transaction<'_>,
  workspace_id: &str,
  path: &str,
  now: DateTime<Utc>,
) -> Result<FileRow> {
  let id = Uuid::new_v4().to_string();
  tx.execute(
    "INSERT INTO files (id, workspace_id, path, content, created_at_ms)
     VALUES (?1, ?2, ?3, '', ?4)",
    params![id, workspace_id, path, to_ms(now)],
  )?;
  Ok(FileRow {
    id,
    workspace_id: workspace_id.to_string(),
    path: path.to_string(),
    content: String::new(),
    deleted_at: None,
    created_at: now,
  })
}

fn row_to_append(r: &rusqlite::Row<'_>) -> rusqlite::Result<Append> {
  let kind: String = r.get(4)?;
  Ok(Append {
    id: r.get(0)?,
    file_id: r.get(1)?,
    seq: r.get(2)?,
    author: r.get(3)?,
    kind: AppendKind::parse(&kind).unwrap_or(AppendKind::Comment),
    ref_id: r.get(5)?,
    expires_at: r.get::<_, Option<i64>>(6)?.map(from_ms),
    content: r.get(7)?,
    content_preview: r.get(8)?,
    created_at: from_ms(r.get(9)?),
  })
}

fn append_in_file_tx(
  tx: &Transaction<'_>,
  file_id: &str,
  append_id: &str,
) -> Result<Option<Append>> {
  let row = tx
    .query_row(
      "SELECT id, file_id, seq, author, kind, ref_id, expires_at_ms, content,
              content_preview, created_at_ms
       FROM appends WHERE file_id = ?1 AND id = ?2",
      params![file_id, append_id],
      row_to_append,
    )
    .optional()?;
  Ok(row)
}

fn terminal_for_claim_tx(tx: &Transaction<'_>, claim_id: &str) -> Result<Option<AppendKind>> {
  let kind: Option<String> = tx
    .query_row(
      "SELECT kind FROM appends
       WHERE ref_id = ?1 AND kind IN ('response', 'cancel', 'blocked')
       ORDER BY seq ASC LIMIT 1",
      params![claim_id],
      |r| r.get(0),
    )
    .optional()?;
  Ok(kind.and_then(|k| AppendKind::parse(&k)))
}

fn effective_deadline_tx(tx: &Transaction<'_>, claim: &Append) -> Result<DateTime<Utc>> {
  let renewed: Option<i64> = tx.query_row(
    "SELECT MAX(expires_at_ms) FROM appends WHERE ref_id = ?1 AND kind = 'renew'",
    params![claim.id],
    |r| r.get(0),
  )?;
  let base = claim.expires_at.map(to_ms).unwrap_or(0);
  Ok(from_ms(renewed.unwrap_or(base).max(base)))
}

/// Renew is only legal while the claim is still active.
fn ensure_claim_alive_tx(
  tx: &Transaction<'_>,
  claim: &Append,
  now: DateTime<Utc>,
) -> Result<()> {
  if terminal_for_claim_tx(tx, &claim.id)?.is_some() {
    return Err(StoreError::ClaimTerminal);
  }
  if now >= effective_deadline_tx(tx, claim)? {
    return Err(StoreError::ClaimInactive);
  }
  Ok(())
}

fn claims_for_task_tx(
  tx: &Transaction<'_>,
  file_id: &str,
  task_id: &str,
) -> Result<Vec<ClaimRow>> {
  let mut stmt = tx.prepare(
    "SELECT a.id, a.author, a.created_at_ms,
            COALESCE(
              (SELECT MAX(r.expires_at_ms) FROM appends r
                WHERE r.ref_id = a.id AND r.kind = 'renew'),
              a.expires_at_ms
            ),
            (SELECT t.kind FROM appends t
              WHERE t.ref_id = a.id
                AND t.kind IN ('response', 'cancel', 'blocked')
              ORDER BY t.seq ASC LIMIT 1)
     FROM appends a
     WHERE a.file_id = ?1 AND a.ref_id = ?2 AND a.kind = 'claim'",
  )?;
  let rows = stmt.query_map(params![file_id, task_id], |r| {
    Ok((
      r.get::<_, String>(0)?,
      r.get::<_, String>(1)?,
      r.get::<_, i64>(2)?,
      r.get::<_, Option<i64>>(3)?,
      r.get::<_, Option<String>>(4)?,
    ))
  })?;
  let mut out = Vec::new();
  for row in rows {
    let (claim_id, author, created, deadline, terminal) = row?;
    out.push(ClaimRow {
      claim_id,
      task_id: task_id.to_string(),
      file_path: String::new(),
      author,
      created_at: from_ms(created),
      deadline: from_ms(deadline.unwrap_or(created)),
      terminal: terminal.and_then(|k| AppendKind::parse(&k)),
    });
  }
  Ok(out)
}

fn active_claims_for_author_tx(
  tx: &Transaction<'_>,
  workspace_id: &str,
  author: &str,
  scope_path: Option<&str>,
  now: DateTime<Utc>,
) -> Result<Vec<ClaimRow>> {
  let mut stmt = tx.prepare(
    "SELECT a.id, a.ref_id, f.path, a.created_at_ms,
            COALESCE(
              (SELECT MAX(r.expires_at_ms) FROM appends r
                WHERE r.ref_id = a.id AND r.kind = 'renew'),
              a.expires_at_ms
            ),
            (SELECT t.kind FROM appends t
              WHERE t.ref_id = a.id
                AND t.kind IN ('response', 'cancel', 'blocked')
              LIMIT 1)
     FROM appends a
     JOIN files f ON f.id = a.file_id
     WHERE a.kind = 'claim' AND a.author = ?1 AND f.workspace_id = ?2",
  )?;
  let rows = stmt.query_map(params![author, workspace_id], |r| {
    Ok((
      r.get::<_, String>(0)?,
      r.get::<_, Option<String>>(1)?,
      r.get::<_, String>(2)?,
      r.get::<_, i64>(3)?,
      r.get::<_, Option<i64>>(4)?,
      r.get::<_, Option<String>>(5)?,
    ))
  })?;
  let mut out = Vec::new();
  for row in rows {
    let (claim_id, task_id, file_path, created, deadline, terminal) = row?;
    if terminal.is_some() {
      continue;
    }
    let deadline = from_ms(deadline.unwrap_or(created));
    if now >= deadline {
      continue;
    }
    if let Some(scope) = scope_path
      && !prefix_matches(&file_path, scope)
    {
      continue;
    }
    out.push(ClaimRow {
      claim_id,
      task_id: task_id.unwrap_or_default(),
      file_path,
      author: author.to_string(),
      created_at: from_ms(created),
      deadline,
      terminal: None,
    });
  }
  Ok(out)
}

fn insert_append_tx(
  tx: &Transaction<'_>,
  file_id: &str,
  req: &AppendInsert,
) -> Result<Append> {
  let next_seq: i64 = tx.query_row(
    "SELECT COALESCE(MAX(seq), 0) + 1 FROM appends WHERE file_id = ?1",
    params![file_id],
    |r| r.get(0),
  )?;
  let id = Uuid::new_v4().to_string();
  tx.execute(
    "INSERT INTO appends
       (id, file_id, seq, author, kind, ref_id, expires_at_ms, content,
        content_preview, created_at_ms)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    params![
      id,
      file_id,
      next_seq,
      req.author,
      req.kind.as_str(),
      req.ref_id,
      req.expires_at.map(to_ms),
      req.content,
      req.content_preview,
      to_ms(req.now),
    ],
  )?;
  Ok(Append {
    id,
    file_id: file_id.to_string(),
    seq: next_seq,
    author: req.author.clone(),
    kind: req.kind,
    ref_id: req.ref_id.clone(),
    expires_at: req.expires_at,
    content: req.content.clone(),
    content_preview: req.content_preview.clone(),
    created_at: req.now,
  })
}

/// Materialized file content is the fold of all content-bearing appends,
/// separated by blank lines.
fn fold_content_tx(
  tx: &Transaction<'_>,
  file_id: &str,
  existing: &str,
  addition: &str,
) -> Result<()> {
  let folded = if existing.is_empty() {
    addition.to_string()
  } else {
    format!("{existing}\n\n{addition}")
  };
  tx.execute("UPDATE files SET content = ?2 WHERE id = ?1", params![file_id, folded])?;
  Ok(())
}

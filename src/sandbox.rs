//! Sandbox Controller
//!
//! Two states, gated by the presence of `.dbl/sandbox.json`:
//!
//! - Inactive: only `start` and `status` are allowed.
//! - Active: the live database is paired with a shadow copy taken at `start`
//!   (and refreshed after every commit). The shadow is the diff baseline.
//!
//! Switching branches while Active is refused so the shadow never drifts from
//! the manifest.

use crate::engine::Engine;
use crate::error::{sandbox_error, DblResult};
use crate::project::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const SHADOW_MODE: &str = "shadow";

/// Persisted session record; its presence alone means Active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSession {
    pub mode: String,
    pub active_db: String,
    pub backup_db: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxStatus {
    Inactive,
    Active(SandboxSession),
}

/// `<db>_dbl_shadow_<unix seconds>`
pub fn shadow_name(db: &str, unix_seconds: i64) -> String {
    format!("{}_dbl_shadow_{}", db, unix_seconds)
}

pub struct SandboxController {
    engine: Arc<dyn Engine>,
    session_path: PathBuf,
}

impl SandboxController {
    pub fn new(engine: Arc<dyn Engine>, session_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            session_path: session_path.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.session_path.exists()
    }

    pub fn session(&self) -> DblResult<Option<SandboxSession>> {
        if !self.is_active() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.session_path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn status(&self) -> DblResult<SandboxStatus> {
        Ok(match self.session()? {
            Some(session) => SandboxStatus::Active(session),
            None => SandboxStatus::Inactive,
        })
    }

    pub fn require_active(&self) -> DblResult<SandboxSession> {
        self.session()?
            .ok_or_else(|| sandbox_error("No sandbox active. Run 'dbl sandbox start' first."))
    }

    /// Refuse `action` while a sandbox is active
    pub fn ensure_inactive(&self, action: &str) -> DblResult<()> {
        if self.is_active() {
            return Err(sandbox_error(format!(
                "Sandbox mode active. Do 'commit' or 'rollback' before {}.",
                action
            )));
        }
        Ok(())
    }

    /// Clone `db` into a fresh shadow database and record the session
    pub async fn start(&self, db: &str) -> DblResult<SandboxSession> {
        if self.is_active() {
            return Err(sandbox_error("Sandbox already active."));
        }

        let backup_db = shadow_name(db, chrono::Utc::now().timestamp());
        info!("Creating safe environment (sandbox) {} -> {}", db, backup_db);
        self.clone_with_fallback(db, &backup_db).await?;

        let session = SandboxSession {
            mode: SHADOW_MODE.to_string(),
            active_db: db.to_string(),
            backup_db,
        };
        write_atomic(&self.session_path, serde_json::to_string(&session)?.as_bytes())?;
        Ok(session)
    }

    /// Restore the live database from the shadow and close the session
    pub async fn rollback(&self) -> DblResult<SandboxSession> {
        let session = self.require_active()?;
        warn!("Reverting changes in {}", session.active_db);

        self.engine.drop_db(&session.active_db).await?;
        self.clone_with_fallback(&session.backup_db, &session.active_db)
            .await?;
        self.engine.drop_db(&session.backup_db).await?;
        fs::remove_file(&self.session_path)?;
        Ok(session)
    }

    /// Keep the live database as-is and discard the shadow
    pub async fn apply(&self) -> DblResult<SandboxSession> {
        let session = self.require_active()?;
        info!("Confirming changes (sandbox closed)");

        self.engine.drop_db(&session.backup_db).await?;
        fs::remove_file(&self.session_path)?;
        Ok(session)
    }

    /// Point the shadow at the live database's current state
    pub async fn resync_backup(&self, session: &SandboxSession) -> DblResult<()> {
        info!("Syncing shadow DB {}", session.backup_db);
        self.engine.drop_db(&session.backup_db).await?;
        self.clone_with_fallback(&session.active_db, &session.backup_db)
            .await
    }

    /// Fast clone, falling back to dump + restore (e.g. when the source has open connections)
    async fn clone_with_fallback(&self, source: &str, target: &str) -> DblResult<()> {
        match self.engine.clone_db(source, target).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Fast clone of {} failed ({}); falling back to dump + restore", source, e);
                self.engine.drop_db(target).await?;
                self.engine.create_db(target).await?;
                self.engine.copy_via_dump(source, target).await
            }
        }
    }
}

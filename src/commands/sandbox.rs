//! `dbl sandbox start|rollback|apply|status`

use super::Context;
use crate::error::DblResult;
use crate::sandbox::{SandboxSession, SandboxStatus};

pub async fn start(ctx: &Context) -> DblResult<SandboxSession> {
    let session = ctx.sandbox().start(ctx.db()).await?;
    println!("Sandbox ready (shadow: {}). You can work locally as usual.", session.backup_db);
    Ok(session)
}

pub async fn rollback(ctx: &Context) -> DblResult<SandboxSession> {
    let session = ctx.sandbox().rollback().await?;
    println!("{} restored to its pre-sandbox state.", session.active_db);
    Ok(session)
}

/// Close the sandbox keeping the live changes; they become the new diff baseline
pub async fn apply(ctx: &Context) -> DblResult<SandboxSession> {
    let session = ctx.sandbox().apply().await?;
    ctx.record_baseline().await?;
    println!("Changes confirmed. Sandbox closed.");
    Ok(session)
}

pub fn status(ctx: &Context) -> DblResult<SandboxStatus> {
    let status = ctx.sandbox().status()?;
    match &status {
        SandboxStatus::Active(session) => println!(
            "Sandbox Active: {} (Shadow: {})",
            session.active_db, session.backup_db
        ),
        SandboxStatus::Inactive => {
            let manifest = ctx.manifests().load()?;
            println!("Current branch: {}", manifest.current);
        }
    }
    Ok(status)
}

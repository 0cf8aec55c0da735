use std::io::Write;

use anyhow::{Context, Result};
use muxdedup_core::Mux;
use muxdedup_storage::RecordRepository;
use tracing::info;

use crate::planner::Decision;
use crate::report::action_lines;

/// Applies decisions through the repository, or only reports them in dry-run mode.
pub struct ActionExecutor<'r, R: ?Sized, W> {
    repo: &'r R,
    dry_run: bool,
    out: W,
    updated: Vec<String>,
    deleted: Vec<String>,
}

impl<'r, R, W> ActionExecutor<'r, R, W>
where
    R: RecordRepository + ?Sized,
    W: Write,
{
    pub fn new(repo: &'r R, dry_run: bool, out: W) -> Self {
        Self {
            repo,
            dry_run,
            out,
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn emit(&mut self, text: &str) -> Result<()> {
        self.out
            .write_all(text.as_bytes())
            .context("writing report")
    }

    /// `older` must already carry the merged values for `UpdateOlder`. The
    /// update always goes out before the newer record is deleted.
    pub async fn execute(&mut self, decision: Decision, newer: &Mux, older: &Mux) -> Result<()> {
        for line in action_lines(decision, newer, older, self.dry_run) {
            writeln!(self.out, "{line}").context("writing report")?;
        }

        match decision {
            Decision::DeleteOlder => self.delete(&older.uuid).await,
            Decision::UpdateOlder { delete_newer } => {
                self.update(older).await?;
                if delete_newer {
                    self.delete(&newer.uuid).await?;
                }
                Ok(())
            }
            Decision::DeleteNewer => self.delete(&newer.uuid).await,
            Decision::Skip | Decision::NoAction => Ok(()),
        }
    }

    async fn update(&mut self, mux: &Mux) -> Result<()> {
        if self.dry_run {
            info!(uuid = %mux.uuid, "would update mux");
        } else {
            info!(uuid = %mux.uuid, "updating mux");
            self.repo
                .update(mux)
                .await
                .with_context(|| format!("updating mux {}", mux.uuid))?;
        }
        self.updated.push(mux.uuid.clone());
        Ok(())
    }

    async fn delete(&mut self, uuid: &str) -> Result<()> {
        if self.dry_run {
            info!(uuid, "would delete mux");
        } else {
            info!(uuid, "deleting mux");
            self.repo
                .delete(uuid)
                .await
                .with_context(|| format!("deleting mux {uuid}"))?;
        }
        self.deleted.push(uuid.to_string());
        Ok(())
    }

    /// Report writer plus the uuids updated and deleted (or that would have been).
    pub fn finish(mut self) -> Result<(W, Vec<String>, Vec<String>)> {
        self.out.flush().context("flushing report")?;
        Ok((self.out, self.updated, self.deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mux;
    use muxdedup_storage::{MemoryRepository, RepositoryCall};
    use serde_json::json;

    fn repo() -> MemoryRepository {
        MemoryRepository::from_json(json!({
            "dvb_mux_dvbs": [
                {"uuid": "n", "orbital": "19.2E", "polarisation": "V", "frequency": 11727000},
                {"uuid": "o", "orbital": "19.2E", "polarisation": "V", "frequency": 11727500},
            ]
        }))
        .expect("repo")
    }

    #[tokio::test]
    async fn dry_run_issues_no_mutations() {
        let repo = repo();
        let newer = mux("n", "19.2E", "V", 11_727_000);
        let older = mux("o", "19.2E", "V", 11_727_500);
        let mut exec = ActionExecutor::new(&repo, true, Vec::new());
        for decision in [
            Decision::DeleteOlder,
            Decision::UpdateOlder { delete_newer: true },
            Decision::DeleteNewer,
        ] {
            exec.execute(decision, &newer, &older).await.expect("execute");
        }
        let (out, updated, deleted) = exec.finish().expect("finish");

        assert!(repo.calls().await.is_empty());
        assert_eq!(updated, ["o"]);
        assert_eq!(deleted, ["o", "n", "n"]);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("would update older mux o"));
        assert!(!text.contains("updating"));
    }

    #[tokio::test]
    async fn live_update_precedes_delete() {
        let repo = repo();
        let newer = mux("n", "19.2E", "V", 11_727_000);
        let mut merged = mux("o", "19.2E", "V", 11_727_500);
        merged.frequency = newer.frequency;

        let mut exec = ActionExecutor::new(&repo, false, Vec::new());
        exec.execute(Decision::UpdateOlder { delete_newer: true }, &newer, &merged)
            .await
            .expect("execute");

        assert_eq!(
            repo.calls().await,
            vec![
                RepositoryCall::Update("o".to_string()),
                RepositoryCall::Delete("n".to_string()),
            ]
        );
        let remaining = repo.records("dvb_mux_dvbs").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["frequency"], json!(11727000));
    }
}

use crate::session::Session;
use anyhow::Context;
use impersonation::Backend;
use std::fs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

/// Copy a file while switched, typically onto a share the switched-to
/// account can write to
#[derive(StructOpt, Debug)]
pub(crate) struct CopyCmd {
    #[structopt(parse(from_os_str))]
    source: PathBuf,

    #[structopt(parse(from_os_str))]
    target: PathBuf,

    /// Refuse to overwrite an existing target
    #[structopt(long)]
    no_clobber: bool,
}

fn copy_file(source: &Path, target: &Path, no_clobber: bool) -> crate::Result<u64> {
    if no_clobber && target.exists() {
        anyhow::bail!("{} already exists", target.display());
    }
    fs::copy(source, target)
        .with_context(|| format!("copying {} to {}", source.display(), target.display()))
}

impl CopyCmd {
    pub(crate) async fn run<B>(&self, session: &Session<B>) -> crate::Result<()>
    where
        B: Backend + Send + Sync + 'static,
    {
        let source = self.source.clone();
        let target = self.target.clone();
        let no_clobber = self.no_clobber;

        let outcome = session
            .execute(move |id| {
                tracing::debug!(identity = %id, "copying {}", source.display());
                let bytes = copy_file(&source, &target, no_clobber)?;
                Ok((id.clone(), bytes))
            })
            .await?;
        let (during, bytes) = outcome.value;

        println!("Before impersonation: {}", outcome.before);
        println!("During impersonation: {}", during);
        println!("After impersonation: {}", outcome.after);
        println!(
            "Copied {} bytes to {}",
            bytes,
            self.target.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::session;

    fn fixture() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.txt");
        fs::write(&source, b"quarterly numbers").unwrap();
        let target = dir.path().join("share-copy.txt");
        (dir, source, target)
    }

    #[test]
    fn copies_and_reports_size() {
        let (_dir, source, target) = fixture();
        assert_eq!(copy_file(&source, &target, false).unwrap(), 17);
        assert_eq!(fs::read(&target).unwrap(), b"quarterly numbers");
    }

    #[test]
    fn no_clobber_leaves_existing_target_alone() {
        let (_dir, source, target) = fixture();
        fs::write(&target, b"keep me").unwrap();
        let err = copy_file(&source, &target, true).unwrap_err();
        assert!(err.to_string().contains("already exists"), "{:#}", err);
        assert_eq!(fs::read(&target).unwrap(), b"keep me");
    }

    #[test]
    fn missing_source_names_both_paths() {
        let (dir, _source, target) = fixture();
        let err = copy_file(&dir.path().join("absent.txt"), &target, false).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.txt"), "{:#}", err);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn copies_under_the_switched_identity() {
        let (_dir, source, target) = fixture();
        let cmd = CopyCmd {
            source,
            target: target.clone(),
            no_clobber: true,
        };
        cmd.run(&session("validpw")).await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"quarterly numbers");
    }

    #[tokio::test]
    async fn failed_logon_copies_nothing() {
        let (_dir, source, target) = fixture();
        let cmd = CopyCmd {
            source,
            target: target.clone(),
            no_clobber: false,
        };
        assert!(cmd.run(&session("wrongpw")).await.is_err());
        assert!(!target.exists());
    }
}

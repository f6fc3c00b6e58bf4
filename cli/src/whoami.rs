use crate::session::Session;
use impersonation::{Backend, IdentityContext};
use serde::Serialize;
use structopt::StructOpt;

/// Show which identity the thread has before, during and after the switch
#[derive(StructOpt, Debug)]
pub(crate) struct WhoamiCmd {
    /// Print a JSON document instead of text
    #[structopt(long)]
    json: bool,
}

#[derive(Serialize, Debug)]
struct Report {
    before: IdentityContext,
    during: IdentityContext,
    after: IdentityContext,
    restored: bool,
}

impl Report {
    fn render_text(&self) -> String {
        format!(
            "Before impersonation: {}\nDuring impersonation: {}\nAfter impersonation: {}",
            self.before, self.during, self.after
        )
    }
}

impl WhoamiCmd {
    pub(crate) async fn run<B>(&self, session: &Session<B>) -> crate::Result<()>
    where
        B: Backend + Send + Sync + 'static,
    {
        let outcome = session.execute(|id| Ok(id.clone())).await?;
        let restored = outcome.restored();
        let report = Report {
            before: outcome.before,
            during: outcome.value,
            after: outcome.after,
            restored,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", report.render_text());
        }

        if !report.restored {
            anyhow::bail!("the thread identity was not restored after the switch");
        }
        Ok(())
    }
}

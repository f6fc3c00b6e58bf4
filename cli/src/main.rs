use impersonation::{Backend, Credential, LogonClass};
use std::path::PathBuf;
use std::time::Duration;
use structopt::{clap::AppSettings, StructOpt};
use tracing_subscriber::EnvFilter;

mod accounts;
mod copy;
mod session;
mod whoami;

use session::Session;

pub type Result<T> = anyhow::Result<T>;

/// The password is only ever taken from the environment so that it does
/// not show up in process listings
const PASSWORD_ENV: &str = "IMPERSONATE_PASSWORD";

#[derive(StructOpt, Debug)]
#[structopt(
    about = "Run an action under another Windows identity",
    setting = AppSettings::DisableVersion,
    setting = AppSettings::VersionlessSubcommands
)]
struct MainCommand {
    #[structopt(flatten)]
    logon: LogonOpts,

    #[structopt(subcommand)]
    subcommand: TopLevelSubcommand,
}

#[derive(StructOpt, Debug)]
struct LogonOpts {
    /// Account to switch to
    #[structopt(long, short, env = "IMPERSONATE_USER")]
    user: String,

    /// Domain of the account; `.` means this machine
    #[structopt(long, short, env = "IMPERSONATE_DOMAIN", default_value = ".")]
    domain: String,

    /// One of new-credentials, interactive, network, network-cleartext,
    /// batch or service
    #[structopt(long, default_value = "new-credentials")]
    logon_class: LogonClass,

    /// Give up waiting for the action after this many seconds.  The
    /// action itself cannot be interrupted and keeps running.
    #[structopt(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Use the account directory in this JSON file instead of the
    /// platform's logon API
    #[structopt(long, value_name = "ACCOUNTS_JSON", parse(from_os_str))]
    simulate: Option<PathBuf>,
}

/// Build the credential from the command line and the environment.
/// Called once per switch, right before the logon.
fn credential_from_env(user: &str, domain: &str) -> Result<Credential> {
    let secret = std::env::var(PASSWORD_ENV).map_err(|_| {
        anyhow::anyhow!(
            "{} must hold the password for {}\\{}",
            PASSWORD_ENV,
            domain,
            user
        )
    })?;
    Ok(Credential::new(user, domain, secret)?)
}

impl LogonOpts {
    fn session<B>(&self, backend: B) -> Session<B>
    where
        B: Backend + Send + Sync + 'static,
    {
        let user = self.user.clone();
        let domain = self.domain.clone();
        Session::new(backend, self.logon_class, move || {
            credential_from_env(&user, &domain)
        })
        .with_timeout(self.timeout.map(Duration::from_secs))
    }
}

#[derive(StructOpt, Debug)]
enum TopLevelSubcommand {
    Whoami(whoami::WhoamiCmd),
    Copy(copy::CopyCmd),
}

impl TopLevelSubcommand {
    async fn run<B>(&self, session: Session<B>) -> Result<()>
    where
        B: Backend + Send + Sync + 'static,
    {
        use TopLevelSubcommand::*;
        match self {
            Whoami(cmd) => cmd.run(&session).await,
            Copy(cmd) => cmd.run(&session).await,
        }
    }
}

impl MainCommand {
    async fn run(&self) -> Result<()> {
        match &self.logon.simulate {
            Some(path) => {
                let backend = accounts::load(path)?;
                self.subcommand.run(self.logon.session(backend)).await
            }
            None => self.run_native().await,
        }
    }

    #[cfg(windows)]
    async fn run_native(&self) -> Result<()> {
        let backend = impersonation::WindowsBackend::default();
        self.subcommand.run(self.logon.session(backend)).await
    }

    #[cfg(not(windows))]
    async fn run_native(&self) -> Result<()> {
        anyhow::bail!(
            "this platform has no logon API to switch identity with; \
             pass --simulate <ACCOUNTS_JSON> to use a simulated account directory"
        )
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cmd = MainCommand::from_args();
    match cmd.run().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

//! Command tree and dispatch
//!
//! Commands are declared as versioned variants and resolved against the
//! detected backend before clap sees them, so a command the backend cannot
//! serve never shows up in `--help`.

mod profile;
mod whoami;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Arg, ArgAction, ArgMatches, Command};
use spacectl::config::ENV_PROFILE;
use spacectl::version::{EarliestVersion, InstanceVersion, ResolvedCommand, Variant, VersionedCommand, resolve};
use spacectl::{
    CredentialKind, Environment, HttpClient, Profile, ProfileStore, Session, SessionFactory,
    StoredCredentials,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::login;

/// What a leaf command does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ProfileLogin,
    ProfileLogout,
    ProfileList,
    ProfileCurrent,
    ProfileSelect,
    ProfileImport,
    ProfileExportToken,
    Whoami,
    Version,
}

/// One revision of a command as clap should see it
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub about: &'static str,
    pub args: fn(Command) -> Command,
    pub action: Option<Action>,
}

fn no_args(command: Command) -> Command {
    command
}

fn leaf(about: &'static str, action: Action) -> CommandSpec {
    CommandSpec {
        about,
        args: no_args,
        action: Some(action),
    }
}

fn group(about: &'static str) -> CommandSpec {
    CommandSpec {
        about,
        args: no_args,
        action: None,
    }
}

fn all(name: &str, spec: CommandSpec) -> VersionedCommand<CommandSpec> {
    VersionedCommand::new(name).variant(Variant::new(EarliestVersion::All, spec))
}

/// Every command this binary knows, in every revision
pub fn tree() -> Vec<VersionedCommand<CommandSpec>> {
    vec![
        VersionedCommand::new("profile").variant(
            Variant::new(EarliestVersion::All, group("Manage Spacelift profiles"))
                .subcommand(all("login", profile::login_spec()))
                .subcommand(all("logout", profile::logout_spec()))
                .subcommand(all(
                    "list",
                    leaf("List all stored profiles", Action::ProfileList),
                ))
                .subcommand(all(
                    "current",
                    leaf("Show the currently selected profile", Action::ProfileCurrent),
                ))
                .subcommand(all("select", profile::select_spec()))
                .subcommand(all("import", profile::import_spec()))
                .subcommand(all(
                    "export-token",
                    leaf(
                        "Print a bearer token for the selected profile",
                        Action::ProfileExportToken,
                    ),
                )),
        ),
        all(
            "whoami",
            leaf("Print the claims of the current token", Action::Whoami),
        ),
        all(
            "version",
            leaf("Print the client and backend versions", Action::Version),
        ),
    ]
}

fn root_command() -> Command {
    Command::new("spacectl")
        .version(spacectl::VERSION)
        .about("Spacelift command-line client")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("profile")
                .long("profile")
                .global(true)
                .value_name("ALIAS")
                .env(ENV_PROFILE)
                .help("Profile to use instead of the current one"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug output to stderr"),
        )
}

fn to_clap(command: &ResolvedCommand<'_, CommandSpec>) -> Command {
    let mut clap = (command.spec.args)(Command::new(command.name.to_string()).about(command.spec.about));
    if command.spec.action.is_none() {
        clap = clap.subcommand_required(true).arg_required_else_help(true);
    }
    command
        .subcommands
        .iter()
        .fold(clap, |clap, sub| clap.subcommand(to_clap(sub)))
}

/// clap command for a resolved tree
pub fn build_cli(resolved: &[ResolvedCommand<'_, CommandSpec>]) -> Command {
    resolved
        .iter()
        .fold(root_command(), |root, command| root.subcommand(to_clap(command)))
}

/// Leaf action selected by `matches`, with that leaf's own matches
pub fn find_action<'m>(
    resolved: &[ResolvedCommand<'_, CommandSpec>],
    matches: &'m ArgMatches,
) -> Option<(Action, &'m ArgMatches)> {
    let (name, sub_matches) = matches.subcommand()?;
    let command = resolved.iter().find(|c| c.name == name)?;
    find_action(&command.subcommands, sub_matches)
        .or_else(|| command.spec.action.map(|action| (action, sub_matches)))
}

/// Flags needed before the versioned tree can be built
#[derive(Debug, Default)]
pub struct Globals {
    pub profile: Option<String>,
    pub debug: bool,
    pub command: Option<String>,
    /// Arguments reach a leaf command; false for `--help` and usage errors
    pub runnable: bool,
}

/// Read global flags without knowing the backend yet.
///
/// SaaS resolution keeps every command name, so any valid invocation
/// parses here.
pub fn parse_globals(args: &[OsString]) -> Globals {
    let commands = tree();
    let resolved = resolve(&commands, InstanceVersion::SaaS);
    let runnable = build_cli(&resolved)
        .try_get_matches_from(args)
        .is_ok_and(|matches| find_action(&resolved, &matches).is_some());
    let Ok(matches) = build_cli(&resolved)
        .ignore_errors(true)
        .try_get_matches_from(args)
    else {
        return Globals::default();
    };

    Globals {
        profile: matches.get_one::<String>("profile").cloned(),
        debug: matches.get_flag("debug"),
        command: matches.subcommand_name().map(str::to_string),
        runnable,
    }
}

/// Shared state of one invocation
pub struct Context {
    pub env: Environment,
    pub store: ProfileStore,
    pub http: HttpClient,
    pub factory: SessionFactory,
    pub cancel: CancellationToken,
    pub instance: InstanceVersion,
    session: OnceCell<Arc<Session>>,
}

impl Context {
    pub fn new(
        mut env: Environment,
        profile: Option<String>,
        http: HttpClient,
        cancel: CancellationToken,
    ) -> Self {
        if let Some(alias) = profile {
            env.set(ENV_PROFILE, alias);
        }
        Self {
            factory: SessionFactory::new(http.clone()),
            env,
            store: ProfileStore::new(),
            http,
            cancel,
            instance: InstanceVersion::Unknown,
            session: OnceCell::new(),
        }
    }

    /// Profile this invocation targets: the override, else `current`
    pub fn selected_profile(&self) -> spacectl::Result<Option<Profile>> {
        match self.env.profile_alias() {
            Some(alias) => self.store.get(alias).map(Some),
            None => self.store.current(),
        }
    }

    /// Session from the default chain, built once, with one autologin retry
    pub async fn session(&self) -> anyhow::Result<Arc<Session>> {
        let session = self
            .session
            .get_or_try_init(|| async { self.build_session().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(session))
    }

    async fn build_session(&self) -> anyhow::Result<Session> {
        self.build_session_with(|credentials| login::browser_login(self, credentials))
            .await
    }

    /// Default chain with one autologin retry through `renew`
    async fn build_session_with<F, Fut>(&self, renew: F) -> anyhow::Result<Session>
    where
        F: FnOnce(StoredCredentials) -> Fut,
        Fut: Future<Output = anyhow::Result<StoredCredentials>>,
    {
        let built = self
            .factory
            .from_default_chain(&self.env, &self.store, &self.cancel)
            .await;
        if !self.env.auto_login() || !wants_autologin(&built) {
            return Ok(built?);
        }

        match &built {
            Ok(_) => tracing::debug!("API token expired, trying autologin"),
            Err(e) => tracing::debug!("session unavailable, trying autologin: {e}"),
        }
        match self.autologin(renew).await? {
            Some(session) => Ok(session),
            None => Ok(built?),
        }
    }

    /// Session if one can be built without prompting
    pub async fn try_session(&self) -> Option<Arc<Session>> {
        if let Some(session) = self.session.get() {
            return Some(Arc::clone(session));
        }
        match self
            .factory
            .from_default_chain(&self.env, &self.store, &self.cancel)
            .await
        {
            Ok(session) => {
                let session = Arc::new(session);
                // A concurrent init would have produced an equivalent session.
                let _ = self.session.set(Arc::clone(&session));
                Some(session)
            }
            Err(e) => {
                tracing::debug!("no session available: {e}");
                None
            }
        }
    }

    /// Renew the selected API token profile, then build a new session.
    ///
    /// `None` when the selected profile cannot be renewed through the browser.
    async fn autologin<F, Fut>(&self, renew: F) -> anyhow::Result<Option<Session>>
    where
        F: FnOnce(StoredCredentials) -> Fut,
        Fut: Future<Output = anyhow::Result<StoredCredentials>>,
    {
        let Some(mut profile) = self.selected_profile()? else {
            return Ok(None);
        };
        if profile.credentials.kind != CredentialKind::ApiToken {
            return Ok(None);
        }

        profile.credentials = renew(profile.credentials).await?;
        self.store
            .save(&profile)
            .with_context(|| format!("saving profile {}", profile.alias))?;

        let session = self
            .factory
            .from_profile(&self.store, Some(&profile.alias), &self.cancel)
            .await?;
        Ok(Some(session))
    }
}

/// Whether a default chain result is worth a browser login
fn wants_autologin(built: &spacectl::Result<Session>) -> bool {
    match built {
        Ok(session) => session.kind() == CredentialKind::ApiToken && !session.has_fresh_token(),
        Err(e) => e.is_authentication(),
    }
}

/// Run the selected action
pub async fn dispatch(ctx: &Context, action: Action, matches: &ArgMatches) -> anyhow::Result<()> {
    match action {
        Action::ProfileLogin => profile::login(ctx, matches).await,
        Action::ProfileLogout => profile::logout(ctx, matches),
        Action::ProfileList => profile::list(ctx),
        Action::ProfileCurrent => profile::current(ctx),
        Action::ProfileSelect => profile::select(ctx, matches),
        Action::ProfileImport => profile::import(ctx, matches),
        Action::ProfileExportToken => profile::export_token(ctx).await,
        Action::Whoami => whoami::whoami(ctx).await,
        Action::Version => {
            println!("spacectl v{}", spacectl::VERSION);
            println!("instance: {}", ctx.instance);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use spacectl::SpacectlError;
    use spacectl::config::ENV_AUTO_LOGIN;
    use spacectl::session::{ExchangeRequest, IssuedToken, TokenExchanger};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ENDPOINT: &str = "https://acme.app.spacelift.io";
    const EXPIRED: u64 = 1_000_000;
    const FRESH: u64 = 4_000_000_000;

    struct Rejecting;

    #[async_trait]
    impl TokenExchanger for Rejecting {
        async fn exchange(
            &self,
            _endpoint: &str,
            _request: ExchangeRequest<'_>,
            _cancel: &CancellationToken,
        ) -> spacectl::Result<IssuedToken> {
            Err(SpacectlError::authentication("apiKeyUser failed: unauthorized"))
        }
    }

    fn jwt(exp: u64) -> String {
        let claims = serde_json::json!({ "aud": [ENDPOINT], "exp": exp });
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(b"test"),
        )
        .unwrap()
    }

    fn context(dir: &TempDir, auto_login: bool) -> Context {
        let env: Environment = if auto_login {
            [(ENV_AUTO_LOGIN, "1")].into_iter().collect()
        } else {
            Environment::default()
        };
        let mut ctx = Context::new(env, None, HttpClient::new().unwrap(), CancellationToken::new());
        ctx.store = ProfileStore::with_root(dir.path());
        ctx.factory = SessionFactory::with_exchanger(Arc::new(Rejecting));
        ctx
    }

    async fn renewed(
        calls: &AtomicUsize,
        credentials: StoredCredentials,
    ) -> anyhow::Result<StoredCredentials> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(StoredCredentials::api_token(credentials.endpoint, jwt(FRESH)))
    }

    fn resolved_cli() -> Command {
        let commands = tree();
        let resolved = resolve(&commands, InstanceVersion::Unknown);
        build_cli(&resolved)
    }

    #[test]
    fn test_cli_is_well_formed() {
        resolved_cli().debug_assert();
    }

    #[test]
    fn test_find_nested_action() {
        let commands = tree();
        let resolved = resolve(&commands, InstanceVersion::SaaS);
        let matches = build_cli(&resolved)
            .try_get_matches_from(["spacectl", "profile", "select", "dev"])
            .unwrap();

        let (action, leaf) = find_action(&resolved, &matches).unwrap();
        assert_eq!(action, Action::ProfileSelect);
        assert_eq!(leaf.get_one::<String>("alias").unwrap(), "dev");
    }

    #[test]
    fn test_group_requires_subcommand() {
        assert!(
            resolved_cli()
                .try_get_matches_from(["spacectl", "profile"])
                .is_err()
        );
    }

    #[test]
    fn test_globals_after_subcommand() {
        let args: Vec<OsString> = ["spacectl", "whoami", "--profile", "prod", "--debug"]
            .into_iter()
            .map(OsString::from)
            .collect();
        let globals = parse_globals(&args);
        assert_eq!(globals.profile.as_deref(), Some("prod"));
        assert!(globals.debug);
        assert_eq!(globals.command.as_deref(), Some("whoami"));
        assert!(globals.runnable);
    }

    #[test]
    fn test_help_and_typos_are_not_runnable() {
        for args in [
            &["spacectl", "whoami", "--help"][..],
            &["spacectl", "-h"],
            &["spacectl", "whoamii"],
            &["spacectl", "profile"],
        ] {
            let args: Vec<OsString> = args.iter().map(OsString::from).collect();
            assert!(!parse_globals(&args).runnable, "{args:?}");
        }
    }

    #[tokio::test]
    async fn test_autologin_renews_expired_api_token() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, true);
        ctx.store
            .create(&Profile::new("dev", StoredCredentials::api_token(ENDPOINT, jwt(EXPIRED))))
            .unwrap();

        let calls = AtomicUsize::new(0);
        let session = ctx
            .build_session_with(|credentials| renewed(&calls, credentials))
            .await
            .unwrap();

        assert!(session.has_fresh_token());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.store.get("dev").unwrap().credentials.access_token, jwt(FRESH));
        assert_eq!(ctx.store.current_alias().unwrap().as_deref(), Some("dev"));
    }

    #[tokio::test]
    async fn test_autologin_after_chain_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, true);
        std::fs::write(
            ctx.store.profile_path("dev"),
            format!(r#"{{"type": 4, "endpoint": "{ENDPOINT}", "access_token": "garbage"}}"#),
        )
        .unwrap();
        ctx.store.select("dev").unwrap();

        let calls = AtomicUsize::new(0);
        let session = ctx
            .build_session_with(|credentials| renewed(&calls, credentials))
            .await
            .unwrap();

        assert!(session.has_fresh_token());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.store.get("dev").unwrap().credentials.access_token, jwt(FRESH));
    }

    #[tokio::test]
    async fn test_autologin_skips_other_credential_kinds() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, true);
        ctx.store
            .create(&Profile::new("ci", StoredCredentials::api_key(ENDPOINT, "01ABC", "secret")))
            .unwrap();

        let calls = AtomicUsize::new(0);
        let err = ctx
            .build_session_with(|credentials| renewed(&calls, credentials))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("unauthorized"), "{err}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_autologin_disabled() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, false);

        let calls = AtomicUsize::new(0);
        assert!(
            ctx.build_session_with(|credentials| renewed(&calls, credentials))
                .await
                .is_err()
        );

        ctx.store
            .create(&Profile::new("dev", StoredCredentials::api_token(ENDPOINT, jwt(EXPIRED))))
            .unwrap();
        let session = ctx
            .build_session_with(|credentials| renewed(&calls, credentials))
            .await
            .unwrap();

        assert!(!session.has_fresh_token());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

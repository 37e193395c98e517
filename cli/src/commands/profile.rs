//! `spacectl profile ...`

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Arg, ArgMatches, Command, value_parser};
use spacectl::{Profile, SpacectlError};

use super::{Action, CommandSpec, Context};
use crate::{login, output};

fn alias_arg(required: bool) -> Arg {
    Arg::new("alias")
        .value_name("ALIAS")
        .required(required)
        .help("Profile alias")
}

pub fn login_spec() -> CommandSpec {
    CommandSpec {
        about: "Log in and store the credentials as a profile",
        args: |command| command.arg(alias_arg(false)),
        action: Some(Action::ProfileLogin),
    }
}

pub fn logout_spec() -> CommandSpec {
    CommandSpec {
        about: "Delete a stored profile",
        args: |command| command.arg(alias_arg(true)),
        action: Some(Action::ProfileLogout),
    }
}

pub fn select_spec() -> CommandSpec {
    CommandSpec {
        about: "Make a profile the current one",
        args: |command| command.arg(alias_arg(true)),
        action: Some(Action::ProfileSelect),
    }
}

pub fn import_spec() -> CommandSpec {
    CommandSpec {
        about: "Create a profile from a JSON credentials file",
        args: |command: Command| {
            command.arg(alias_arg(true)).arg(
                Arg::new("file")
                    .value_name("FILE")
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .help("Credentials file"),
            )
        },
        action: Some(Action::ProfileImport),
    }
}

fn alias(matches: &ArgMatches) -> Option<&str> {
    matches.get_one::<String>("alias").map(String::as_str)
}

fn required_alias(matches: &ArgMatches) -> anyhow::Result<&str> {
    alias(matches).context("missing profile alias")
}

pub async fn login(ctx: &Context, matches: &ArgMatches) -> anyhow::Result<()> {
    let alias = match alias(matches) {
        Some(alias) => alias.to_string(),
        None => login::prompt_alias(ctx)?,
    };
    spacectl::auth::validate_alias(&alias)?;

    let existing = match ctx.store.get(&alias) {
        Ok(profile) => Some(profile),
        Err(SpacectlError::ProfileNotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let credentials = login::interactive_login(ctx, &alias, existing.as_ref()).await?;
    let profile = Profile::new(alias, credentials);
    ctx.store
        .create(&profile)
        .with_context(|| format!("saving profile {}", profile.alias))?;

    output::display_success(&format!("Logged in as profile {}", profile.alias));
    Ok(())
}

pub fn logout(ctx: &Context, matches: &ArgMatches) -> anyhow::Result<()> {
    let alias = required_alias(matches)?;
    ctx.store.delete(alias)?;
    output::display_success(&format!("Removed profile {alias}"));
    Ok(())
}

pub fn list(ctx: &Context) -> anyhow::Result<()> {
    let profiles = ctx.store.list()?;
    if profiles.is_empty() {
        println!("No profiles. Run `spacectl profile login` to create one.");
        return Ok(());
    }

    let current = ctx.store.current_alias()?;
    output::display_profiles(&profiles, current.as_deref());
    Ok(())
}

pub fn current(ctx: &Context) -> anyhow::Result<()> {
    match ctx.store.current()? {
        Some(profile) => {
            output::display_profiles(std::slice::from_ref(&profile), Some(&profile.alias));
            Ok(())
        }
        None => Err(SpacectlError::NoCurrentProfile.into()),
    }
}

pub fn select(ctx: &Context, matches: &ArgMatches) -> anyhow::Result<()> {
    let alias = required_alias(matches)?;
    ctx.store.select(alias)?;
    output::display_success(&format!("Selected profile {alias}"));
    Ok(())
}

pub fn import(ctx: &Context, matches: &ArgMatches) -> anyhow::Result<()> {
    let alias = required_alias(matches)?;
    let file = matches
        .get_one::<PathBuf>("file")
        .context("missing credentials file")?;

    let profile = ctx.store.import(alias, file)?;
    output::display_success(&format!(
        "Imported profile {} ({})",
        profile.alias, profile.credentials.kind
    ));
    Ok(())
}

pub async fn export_token(ctx: &Context) -> anyhow::Result<()> {
    let session = ctx.session().await?;
    let token = session.bearer_token(&ctx.cancel).await?;
    println!("{token}");
    Ok(())
}

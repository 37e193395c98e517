//! Interactive login prompts

use anyhow::Context as _;
use spacectl::config::LoginDefaults;
use spacectl::login::open_browser;
use spacectl::{BrowserHandshake, CredentialKind, HandshakeConfig, Profile, StoredCredentials};

use crate::commands::Context;

const KIND_PROMPT: &str = "Credential type: 1) API key, 2) GitHub access token, 4) Login with a browser";

fn required(label: &'static str) -> impl Fn(&String) -> Result<(), &'static str> {
    move |value: &String| {
        if value.trim().is_empty() {
            Err(label)
        } else {
            Ok(())
        }
    }
}

/// Ask for a profile alias, offering the current one
pub fn prompt_alias(ctx: &Context) -> anyhow::Result<String> {
    let mut input = cliclack::input("Profile alias").validate(|alias: &String| {
        spacectl::auth::validate_alias(alias.trim()).map_err(|e| e.to_string())
    });
    if let Some(current) = ctx.store.current_alias()? {
        input = input.default_input(&current);
    }
    let alias: String = input.interact()?;
    Ok(alias.trim().to_string())
}

/// Parse the number typed at the credential type prompt
fn parse_kind(answer: &str) -> anyhow::Result<CredentialKind> {
    let answer = answer.trim();
    let kind = answer
        .parse::<u8>()
        .ok()
        .and_then(|n| CredentialKind::try_from(n).ok())
        .filter(|kind| *kind != CredentialKind::Invalid);
    kind.with_context(|| format!("unknown credential type: {answer}"))
}

fn prompt_kind() -> anyhow::Result<CredentialKind> {
    let answer: String = cliclack::input(KIND_PROMPT)
        .default_input(&CredentialKind::ApiToken.as_number().to_string())
        .interact()?;
    parse_kind(&answer)
}

/// Collect, verify and return credentials for `alias`
pub async fn interactive_login(
    ctx: &Context,
    alias: &str,
    existing: Option<&Profile>,
) -> anyhow::Result<StoredCredentials> {
    let defaults = LoginDefaults::from_env(&ctx.env)?;
    cliclack::intro(format!("Logging in to profile {alias}"))?;

    let mut endpoint = cliclack::input("Spacelift endpoint")
        .placeholder("https://example.app.spacelift.io")
        .validate(required("Endpoint is required"));
    let offered = defaults
        .endpoint
        .clone()
        .or_else(|| existing.map(|p| p.credentials.endpoint.clone()));
    if let Some(offered) = offered {
        endpoint = endpoint.default_input(&offered);
    }
    let endpoint: String = endpoint.interact()?;
    let endpoint = endpoint.trim().to_string();

    let kind = match defaults.method {
        Some(method) => method.credential_kind(),
        None => prompt_kind()?,
    };

    let credentials = match kind {
        CredentialKind::ApiKey => {
            let key_id: String = cliclack::input("API key ID")
                .validate(required("API key ID is required"))
                .interact()?;
            let key_secret = cliclack::password("API key secret")
                .mask('▪')
                .validate(required("API key secret is required"))
                .interact()?;
            StoredCredentials::api_key(endpoint, key_id.trim(), key_secret)
        }
        CredentialKind::GitHubToken => {
            let token = cliclack::password("GitHub access token")
                .mask('▪')
                .validate(required("GitHub access token is required"))
                .interact()?;
            StoredCredentials::github_token(endpoint, token)
        }
        CredentialKind::ApiToken => {
            browser_login_with(ctx, StoredCredentials::api_token(endpoint, ""), &defaults).await?
        }
        CredentialKind::Invalid => anyhow::bail!("unknown credential type: 0"),
    };

    let spinner = cliclack::spinner();
    spinner.start("Verifying credentials...");
    match ctx.factory.from_credentials(&credentials, &ctx.cancel).await {
        Ok(_) => spinner.stop("Credentials verified"),
        Err(e) => {
            spinner.error("Verification failed");
            return Err(e).context("credentials were rejected");
        }
    }

    cliclack::outro("Done")?;
    Ok(credentials)
}

/// Run the browser handshake for API token `credentials`
pub async fn browser_login(
    ctx: &Context,
    credentials: StoredCredentials,
) -> anyhow::Result<StoredCredentials> {
    let defaults = LoginDefaults::from_env(&ctx.env)?;
    browser_login_with(ctx, credentials, &defaults).await
}

async fn browser_login_with(
    ctx: &Context,
    credentials: StoredCredentials,
    defaults: &LoginDefaults,
) -> anyhow::Result<StoredCredentials> {
    let handshake = BrowserHandshake::begin(credentials, &HandshakeConfig::from(defaults))
        .await
        .context("starting browser login")?;

    let url = handshake.login_url().to_string();
    match open_browser(&url) {
        Ok(()) => cliclack::log::info("Opened the login page in your browser")?,
        Err(e) => {
            tracing::debug!("{e}");
            cliclack::log::info(format!("Open this address in your browser to log in:\n{url}"))?;
        }
    }

    let spinner = cliclack::spinner();
    spinner.start("Waiting for the browser login to complete...");
    match handshake.wait(&ctx.cancel).await {
        Ok(credentials) => {
            spinner.stop("Browser login complete");
            Ok(credentials)
        }
        Err(e) => {
            spinner.error("Browser login failed");
            Err(e.into())
        }
    }
}

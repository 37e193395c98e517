//! Styled terminal output

use console::style;
use spacectl::utils::mask_secret;
use spacectl::{CredentialKind, Profile};

/// Print an error to stderr
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), message);
}

/// Print a success line
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

fn credential_hint(profile: &Profile) -> String {
    let credentials = &profile.credentials;
    match credentials.kind {
        CredentialKind::ApiKey => mask_secret(&credentials.key_id),
        CredentialKind::GitHubToken => mask_secret(&credentials.access_token),
        CredentialKind::ApiToken | CredentialKind::Invalid => "-".to_string(),
    }
}

/// Print profiles as a table, marking the selected one
pub fn display_profiles(profiles: &[Profile], current: Option<&str>) {
    let rows: Vec<[String; 3]> = profiles
        .iter()
        .map(|p| [p.alias.clone(), p.credentials.kind.to_string(), credential_hint(p)])
        .collect();
    let width = |column: usize, header: &str| {
        rows.iter()
            .map(|row| row[column].chars().count())
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or_default()
    };
    let (alias_width, kind_width, hint_width) =
        (width(0, "ALIAS"), width(1, "TYPE"), width(2, "CREDENTIAL"));

    println!(
        "  {}",
        style(format!(
            "{:alias_width$}  {:kind_width$}  {:hint_width$}  ENDPOINT",
            "ALIAS", "TYPE", "CREDENTIAL"
        ))
        .dim()
    );
    for (profile, [alias, kind, hint]) in profiles.iter().zip(rows) {
        let selected = current == Some(profile.alias.as_str());
        let marker = if selected { "*" } else { " " };
        let alias = format!("{alias:alias_width$}");
        let alias = if selected {
            style(alias).cyan().bold()
        } else {
            style(alias)
        };
        println!(
            "{} {}  {kind:kind_width$}  {hint:hint_width$}  {}",
            style(marker).cyan(),
            alias,
            profile.credentials.endpoint
        );
    }
}

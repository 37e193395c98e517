use spacectl::session::TokenClaims;

use super::Context;

/// Print the unverified claims of the current bearer token
pub async fn whoami(ctx: &Context) -> anyhow::Result<()> {
    let session = ctx.session().await?;
    let token = session.bearer_token(&ctx.cancel).await?;
    let claims = TokenClaims::parse(&token)?;
    println!("{}", serde_json::to_string_pretty(claims.raw())?);
    Ok(())
}

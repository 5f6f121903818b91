use anyhow::{Result, bail};

use grantstore_auth::LookupKey;

use crate::cli::{InspectArgs, RevokeArgs};
use crate::commands::App;
use crate::output::{print_json, print_success, print_warning};

fn lookup_key(args: &InspectArgs) -> Result<LookupKey> {
    if let Some(code) = &args.code {
        return Ok(LookupKey::Code(code.clone()));
    }
    if let Some(access) = &args.access {
        return Ok(LookupKey::Access(access.clone()));
    }
    if let Some(refresh) = &args.refresh {
        return Ok(LookupKey::Refresh(refresh.clone()));
    }
    match args.account.as_deref() {
        Some([user_id, client_id]) => Ok(LookupKey::Account {
            user_id: user_id.clone(),
            client_id: client_id.clone(),
        }),
        _ => bail!("one of --code, --access, --refresh or --account USER CLIENT is required"),
    }
}

pub async fn inspect(app: &App, args: &InspectArgs) -> Result<()> {
    let key = lookup_key(args)?;
    match app.tokens.resolve(&key).await? {
        Some(grant) => print_json(&grant),
        None => {
            print_warning("No live grant found");
            Ok(())
        }
    }
}

pub async fn revoke(app: &App, args: &RevokeArgs) -> Result<()> {
    if let Some(code) = &args.code {
        app.tokens.remove_by_code(code).await?;
        print_success("Authorization code removed");
    } else if let Some(access) = &args.access {
        app.tokens.remove_by_access(access).await?;
        print_success("Access token removed");
    } else if let Some(refresh) = &args.refresh {
        app.tokens.remove_by_refresh(refresh).await?;
        print_success("Refresh token removed");
    } else {
        bail!("one of --code, --access or --refresh is required");
    }
    Ok(())
}

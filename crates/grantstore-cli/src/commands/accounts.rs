use anyhow::{Result, bail};

use grantstore_auth::{ClientRecord, SimpleUser};

use crate::cli::{ClientAddArgs, ClientCommands, PasswordArgs, UserCommands};
use crate::commands::App;
use crate::output::{print_json, print_success, print_warning};

pub async fn client(app: &App, command: &ClientCommands) -> Result<()> {
    match command {
        ClientCommands::Add(ClientAddArgs {
            id,
            secret,
            domain,
            user_id,
        }) => {
            let client = ClientRecord::new(id, secret)
                .with_domain(domain)
                .with_user_id(user_id);
            app.clients.add(&client).await?;
            print_success(&format!("Client '{id}' registered"));
        }
        ClientCommands::Get { id } => match app.clients.get_by_id(id).await? {
            Some(client) => print_json(&client)?,
            None => print_warning(&format!("Client '{id}' not found")),
        },
        ClientCommands::Remove { id } => {
            app.clients.remove(id).await?;
            print_success(&format!("Client '{id}' removed"));
        }
    }
    Ok(())
}

pub async fn user(app: &App, command: &UserCommands) -> Result<()> {
    match command {
        UserCommands::Add(PasswordArgs { id, password }) => {
            if password.is_empty() {
                bail!("password must not be empty");
            }
            let user = SimpleUser::with_password(id, password)?;
            app.users.save(&user).await?;
            print_success(&format!("User '{id}' created"));
        }
        UserCommands::Passwd(PasswordArgs { id, password }) => {
            if password.is_empty() {
                bail!("password must not be empty");
            }
            app.users.update_password(id, password).await?;
            print_success(&format!("Password updated for '{id}'"));
        }
        UserCommands::Remove { id } => {
            app.users.remove(id).await?;
            print_success(&format!("User '{id}' removed"));
        }
    }
    Ok(())
}

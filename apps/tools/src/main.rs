use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::{ChannelName, UserId, DEFAULT_CHANNEL};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/chat.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        user_id: String,
        email: String,
    },
    ListUsers,
    ListMessages {
        #[arg(default_value = DEFAULT_CHANNEL)]
        channel: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { user_id, email } => {
            storage.upsert_user(&UserId(user_id.clone()), &email).await?;
            println!("created user_id={user_id}");
        }
        Command::ListUsers => {
            for user in storage.list_users().await? {
                println!("{}\t{}", user.user_id, user.email);
            }
        }
        Command::ListMessages { channel } => {
            for message in storage
                .list_channel_messages(&ChannelName(channel))
                .await?
            {
                println!(
                    "{}\t{}\t{}\t{}",
                    message.message_id.0,
                    message
                        .created_at
                        .map(|at| at.0.to_string())
                        .unwrap_or_else(|| "pending".into()),
                    message.sender_id.as_deref().unwrap_or("-"),
                    message.body
                );
            }
        }
    }

    Ok(())
}

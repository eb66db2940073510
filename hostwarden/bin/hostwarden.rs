use clap::{CommandFactory, Parser};
use hostwarden::{
    app::{self, Hostwarden},
    cli::{AnsiStyles, HostwardenArgs, HostwardenSubcommand, UserSubcommand},
    log, HostwardenResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> HostwardenResult<()> {
    // A missing .env file is fine; flags and the real environment still apply.
    let _ = dotenvy::dotenv();

    let args = HostwardenArgs::parse();
    match args.subcommand {
        Some(HostwardenSubcommand::Serve(serve)) => {
            let _guard = log::init_logging(args.verbose, serve.log_dir.as_deref())?;
            let config = serve.into_config()?;

            Hostwarden::build(config).await?.serve().await?;
        }
        Some(HostwardenSubcommand::User {
            subcommand:
                UserSubcommand::Add {
                    username,
                    email,
                    role,
                    password,
                    db,
                },
        }) => {
            let _guard = log::init_logging(args.verbose, None)?;
            let (user, generated) =
                match app::add_user(&db, &username, &email, role, password).await {
                    Ok(created) => created,
                    Err(e) => {
                        eprintln!("{} {}", "error:".error(), e);
                        std::process::exit(1);
                    }
                };

            println!(
                "{} {} ({})",
                "created".valid(),
                user.username.literal(),
                user.role
            );
            if let Some(password) = generated {
                println!("{} {}", "password:".header(), password.literal());
            }
        }
        None => {
            HostwardenArgs::command().print_help()?;
        }
    }

    Ok(())
}

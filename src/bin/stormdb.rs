use anyhow::Result;
use stormdb::cli::{actions, actions::Action, start};

#[tokio::main]
async fn main() -> Result<()> {
    let action = start()?;

    let code = match action {
        Action::Run { .. } => actions::run::handle(action).await?,
        Action::Setup { .. } => actions::setup::handle(action).await?,
        Action::Cleanup { .. } => actions::cleanup::handle(action).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

use anyhow::Context;
use rr_arena::client::{connect, ClientSettings, PlayerClient};
use rr_arena::prelude::*;

fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    if config.log {
        rr_arena::init_logger(&config)?;
    }
    let settings = ClientSettings::from_env();
    let factory = GameCatalog::builtin()
        .get(&settings.game)
        .with_context(|| format!("unknown game type '{}'", settings.game))?;

    let connection = connect(&settings, PlayerClient::new(&settings, factory), &config)?;
    let client = connection.run();

    match client.pid() {
        Some(pid) => println!("Played as player {pid}. Reconnect with ARENA_PID={pid}."),
        None => println!("The server never registered this player."),
    }
    let tally = client.tally();
    println!(
        "Won {}, lost {}, tied {}.",
        tally.wins, tally.losses, tally.ties
    );
    println!("Good-bye!");
    Ok(())
}

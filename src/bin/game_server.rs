use anyhow::Context;
use rr_arena::prelude::*;

fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    let server = GameServer::bind(config).context("starting game server")?;
    println!(
        "Game server listening on {} (games: {})",
        server.local_addr()?,
        server.registry().game_names().join(", ")
    );
    server.run()
}

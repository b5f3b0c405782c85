use std::io::{self, BufRead, Write};

use anyhow::Context;
use rr_arena::client::{connect, ClientSettings, TourControls, TourManager};
use rr_arena::prelude::*;

const MENU: &str = "\
0. Enter command string directly.
1. Create tournament.
2. Start tournament.
3. Pause tournament.
4. End tournament.
5. Print report of tournament status.
6. Matches left.
7. Quit.";

fn prompt(stdin: &mut impl BufRead, question: &str) -> anyhow::Result<Option<String>> {
    println!("{question}");
    io::stdout().flush()?;
    let mut line = String::new();
    if stdin.read_line(&mut line).context("reading user input")? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn menu(controls: &TourControls) -> anyhow::Result<()> {
    let mut stdin = io::stdin().lock();
    println!("Game Tournament Interactive System");
    println!("Enter ? for the menu options.");
    while let Some(choice) = prompt(&mut stdin, ">")? {
        match choice.as_str() {
            "?" | "" => println!("{MENU}"),
            "0" => {
                let question = "Please enter a raw command to send to game server.";
                if let Some(raw) = prompt(&mut stdin, question)? {
                    controls.raw(&raw);
                }
            }
            "1" => {
                let question = "Please enter name of game for the tournament.";
                if let Some(kind) = prompt(&mut stdin, question)? {
                    controls.create(&kind);
                }
            }
            "2" => {
                controls.start();
            }
            "3" => {
                controls.pause();
            }
            "4" => {
                controls.end();
            }
            "5" => {
                controls.report();
            }
            "6" => {
                controls.matches_left();
            }
            "7" => break,
            _ => eprintln!("Unrecognized option."),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    if config.log {
        rr_arena::init_logger(&config)?;
    }
    let settings = ClientSettings::from_env();

    let manager = TourManager::new(&settings).with_echo(true);
    let controls = manager.controls();
    let connection = connect(&settings, manager, &config)?.spawn();

    let result = menu(&controls);
    controls.quit();
    if connection.join().is_err() {
        eprintln!("connection thread panicked");
    }
    println!("Good-bye!");
    result
}

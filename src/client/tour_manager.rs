use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::client::{client_outbox, ClientSettings};
use crate::connection::{Outbox, Protocol};
use crate::error::ProtocolError;
use crate::game_interface::{Outcome, Side};
use crate::player::PlayerId;
use crate::protocol::{CommandTable, Frame, Message};
use crate::tournament::TournamentId;

/// Points for a win.
pub const WIN_POINTS: u32 = 3;
/// Points for a tie.
pub const TIE_POINTS: u32 = 1;

/// Record of one player, rebuilt from each report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Standing {
    /// Player id.
    pub id: PlayerId,
    /// Name, once the server told it.
    pub name: Option<String>,
    /// Matches won.
    pub wins: u32,
    /// Matches lost.
    pub losses: u32,
    /// Matches tied.
    pub ties: u32,
}

impl Standing {
    /// Tournament points.
    pub fn points(&self) -> u32 {
        self.wins * WIN_POINTS + self.ties * TIE_POINTS
    }

    fn record(&mut self, outcome: Outcome, side: Side) {
        match outcome {
            Outcome::Tie => self.ties += 1,
            o if o.is_win_for(side) => self.wins += 1,
            _ => self.losses += 1,
        }
    }
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("Player {}", self.id));
        write!(
            f,
            "{name:<20} {:>3} pts  {}W {}L {}T",
            self.points(),
            self.wins,
            self.losses,
            self.ties
        )
    }
}

/// Sends organizer commands through a connection owned by a [`TourManager`].
#[derive(Debug, Clone)]
pub struct TourControls {
    outbox: Arc<Outbox>,
}

impl TourControls {
    /// Creates a tournament of `kind`. The server answers with `@TID`.
    pub fn create(&self, kind: &str) -> bool {
        self.outbox.post(Message::TourCreate(kind.trim().to_string()))
    }

    /// Lets the scheduler start matches.
    pub fn start(&self) -> bool {
        self.outbox.post(Message::TourStart)
    }

    /// Stops starting new matches.
    pub fn pause(&self) -> bool {
        self.outbox.post(Message::TourPause)
    }

    /// Ends the tournament.
    pub fn end(&self) -> bool {
        self.outbox.post(Message::TourEnd)
    }

    /// Asks for the match report.
    pub fn report(&self) -> bool {
        self.outbox.post(Message::TourReport)
    }

    /// Asks how many matches are left.
    pub fn matches_left(&self) -> bool {
        self.outbox.post(Message::TourMatchesLeft)
    }

    /// Sends a line as typed.
    pub fn raw(&self, line: &str) -> bool {
        self.outbox.post_line(line.trim())
    }

    /// Closes the connection.
    pub fn quit(&self) {
        self.outbox.close();
    }
}

/// The organizer role: creates and steers a tournament and keeps standings from its reports.
pub struct TourManager {
    outbox: Arc<Outbox>,
    pid: Option<PlayerId>,
    tid: Option<TournamentId>,
    names: BTreeMap<PlayerId, String>,
    asked: BTreeSet<PlayerId>,
    standings: Vec<Standing>,
    last_report: Option<String>,
    echo: bool,
}

impl TourManager {
    /// An organizer. Queues the handshake described by `settings`.
    pub fn new(settings: &ClientSettings) -> Self {
        let outbox = client_outbox();
        outbox.post(match settings.pid {
            Some(pid) => Message::Player(pid),
            None => Message::NewPlayer,
        });
        if let Some(name) = &settings.name {
            outbox.post(Message::SetName(name.clone()));
        }
        TourManager {
            outbox,
            pid: settings.pid,
            tid: settings.tid,
            names: BTreeMap::new(),
            asked: BTreeSet::new(),
            standings: vec![],
            last_report: None,
            echo: false,
        }
    }

    /// Prints server replies and standings to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Handle to send commands once the manager runs on its connection.
    pub fn controls(&self) -> TourControls {
        TourControls {
            outbox: self.outbox.clone(),
        }
    }

    /// Player id assigned by the server.
    pub fn pid(&self) -> Option<PlayerId> {
        self.pid
    }

    /// Tournament created by this organizer.
    pub fn tid(&self) -> Option<TournamentId> {
        self.tid
    }

    /// Last raw report received.
    pub fn last_report(&self) -> Option<&str> {
        self.last_report.as_deref()
    }

    /// Standings from the last report, best first.
    pub fn standings(&self) -> &[Standing] {
        &self.standings
    }

    fn commands() -> &'static CommandTable<Self> {
        static COMMANDS: OnceLock<CommandTable<TourManager>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandTable::new()
                .on("@PID", Self::on_pid)
                .on("@TID", Self::on_tid)
                .on("@REPORT", Self::on_report)
                .on("@NAME", Self::on_name)
                .on("@MESSAGE", Self::on_message)
                .on("@ERROR", Self::on_server_error)
                .on("@TOUR", Self::on_tour)
                .on("@GAME", Self::ignore)
                .on("@PING", Self::on_ping)
                .on("@PONG", Self::ignore)
        })
    }

    fn say(&self, text: &str) {
        if self.echo {
            println!("Server: {text}");
        }
    }

    fn ignore(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn on_ping(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        self.outbox.post(Message::Pong);
        Ok(())
    }

    fn on_pid(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let pid = frame.integer(1, "PID without an id.", "PID")?;
        info!(pid, "organizer registered");
        self.say(&format!("Player registered with ID={pid}."));
        self.pid = Some(pid);
        Ok(())
    }

    fn on_tid(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let tid = frame.integer(1, "TID without an id.", "TID")?;
        info!(tid, "tournament created");
        self.say(&format!("Tournament registered with ID={tid}."));
        self.tid = Some(tid);
        Ok(())
    }

    fn on_message(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let text = frame.field(1).unwrap_or_default();
        debug!(text, "server message");
        self.say(text);
        Ok(())
    }

    fn on_server_error(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let text = frame.field(1).unwrap_or_default();
        warn!(reason = text, "server refused a command");
        self.say(&format!("ERROR: {text}"));
        Ok(())
    }

    fn on_tour(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        if frame.key(1).as_deref() == Some("END") {
            self.say("The tournament has ended.");
        }
        Ok(())
    }

    fn on_name(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let name = frame.require(1, "NAME without a name.")?;
        let id: PlayerId = frame.integer(2, "NAME without an id.", "ID")?;
        self.names.insert(id, name.to_string());
        for standing in self.standings.iter_mut().filter(|s| s.id == id) {
            standing.name = Some(name.to_string());
        }
        Ok(())
    }

    fn on_report(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let csv = frame.field(1).unwrap_or_default();
        self.standings = self.tabulate(csv)?;
        self.last_report = Some(csv.to_string());

        for standing in &self.standings {
            if standing.name.is_none() && self.asked.insert(standing.id) {
                self.outbox.post(Message::GetName(standing.id));
            }
        }
        if self.echo {
            println!("Report received: {csv}");
            for standing in &self.standings {
                println!("{standing}");
            }
        }
        Ok(())
    }

    /// Standings from a `home/away/state,...` report. Unfinished matches only list players.
    fn tabulate(&self, csv: &str) -> Result<Vec<Standing>, ProtocolError> {
        let mut table: BTreeMap<PlayerId, Standing> = BTreeMap::new();
        for entry in csv.split(',').filter(|e| !e.trim().is_empty()) {
            let malformed = || ProtocolError::InvalidInteger {
                field: "REPORT",
                value: entry.to_string(),
            };
            let mut parts = entry.trim().split('/');
            let (Some(home), Some(away), Some(state), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(malformed());
            };
            let home: PlayerId = home.parse().map_err(|_| malformed())?;
            let away: PlayerId = away.parse().map_err(|_| malformed())?;
            let outcome = match state {
                "N" | "I" => None,
                other => Some(other.parse::<Outcome>().map_err(|_| malformed())?),
            };

            for (id, side) in [(home, Side::Home), (away, Side::Away)] {
                let standing = table.entry(id).or_insert_with(|| Standing {
                    id,
                    name: self.names.get(&id).cloned(),
                    ..Standing::default()
                });
                if let Some(outcome) = outcome {
                    standing.record(outcome, side);
                }
            }
        }
        let mut standings: Vec<Standing> = table.into_values().collect();
        standings.sort_by(|a, b| b.points().cmp(&a.points()).then(a.id.cmp(&b.id)));
        Ok(standings)
    }
}

impl Protocol for TourManager {
    fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        Self::commands().dispatch(self, frame)
    }

    fn on_error(&mut self, error: ProtocolError) {
        warn!(%error, "unexpected line from server");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(manager: &mut TourManager, line: &str) {
        if let Err(error) = manager.dispatch(&Frame::parse(line)) {
            manager.on_error(error);
        }
    }

    #[test]
    fn controls_write_organizer_commands() {
        let manager = TourManager::new(&ClientSettings::default().with_name("org"));
        let controls = manager.controls();
        controls.create(" nim ");
        controls.start();
        controls.matches_left();
        controls.end();
        assert_eq!(
            manager.outbox.drain(),
            vec![
                "@NEW PLAYER",
                "@NAME:org",
                "@TOUR:CREATE:nim",
                "@TOUR:START",
                "@TOUR:MATCHES LEFT",
                "@TOUR:END"
            ]
        );
    }

    #[test]
    fn report_becomes_standings() {
        let mut manager = TourManager::new(&ClientSettings::default());
        manager.outbox.drain();

        feed(&mut manager, "@REPORT:2/3/H,3/2/T,2/4/A,4/2/I,3/4/N,4/3/H");
        let points: Vec<(PlayerId, u32)> = manager
            .standings()
            .iter()
            .map(|s| (s.id, s.points()))
            .collect();
        assert_eq!(points, vec![(4, 6), (2, 4), (3, 1)]);
        let two = &manager.standings()[1];
        assert_eq!((two.wins, two.losses, two.ties), (1, 1, 1));

        // names are asked once per player
        assert_eq!(
            manager.outbox.drain(),
            vec!["@GET NAME:4", "@GET NAME:2", "@GET NAME:3"]
        );
        feed(&mut manager, "@REPORT:2/3/H");
        assert!(manager.outbox.drain().is_empty());

        feed(&mut manager, "@NAME:ann:2");
        assert_eq!(manager.standings()[0].name.as_deref(), Some("ann"));
        feed(&mut manager, "@REPORT:2/3/H,3/2/H");
        assert_eq!(manager.standings()[0].name.as_deref(), Some("ann"));
    }

    #[test]
    fn malformed_report_keeps_the_previous_standings() {
        let mut manager = TourManager::new(&ClientSettings::default());
        feed(&mut manager, "@REPORT:1/2/H");
        feed(&mut manager, "@REPORT:1/2/Q");
        assert_eq!(manager.last_report(), Some("1/2/H"));
        assert_eq!(manager.standings().len(), 2);
    }

    #[test]
    fn remembers_its_ids() {
        let mut manager = TourManager::new(&ClientSettings::default());
        feed(&mut manager, "@PID:7");
        feed(&mut manager, "@TID:2");
        assert_eq!((manager.pid(), manager.tid()), (Some(7), Some(2)));
    }
}

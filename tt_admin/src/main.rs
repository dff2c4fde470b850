//! Operator CLI for the table-tennis bracket engine.
//!
//! Each invocation runs one command against PostgreSQL through the
//! tournament manager and prints its result to stdout as JSON.

mod config;
mod logging;

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Error, anyhow, bail};
use chrono::{DateTime, Utc};
use ctrlc::set_handler;
use log::info;
use pico_args::Arguments;
use serde::Serialize;
use serde_json::Value;
use table_tennis::{
    bracket::{EngineError, MatchId, Rubber, SetScore, Side},
    db::{Database, PgTournamentRepository},
    tournament::{
        NewParticipant, NewTournament, ParticipantId, TournamentError, TournamentFormat,
        TournamentId, TournamentManager,
    },
};

use config::AdminConfig;

const HELP: &str = "\
Manage table-tennis tournaments

USAGE:
  tt_admin [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
  create <name> <format>                  Create a tournament (single_elimination,
                                          double_elimination, double_elimination_final, league)
  register <tournament> <name>            Register a new player
  enroll <tournament> <participant>       Register an existing player with their rating
  team <tournament> <name>                Register a league team
  start <tournament>                      Close registration
  generate <tournament>                   Build, link and seed the bracket
  sets <tournament> <match> <SET>...      Record set scores, e.g. 11-7 9-11 11-5
  rubbers <tournament> <match> <RUBBER>...
                                          Record league rubbers, e.g. 11-7,11-5,11-9
  report <tournament> <match>             Decide a match from its recorded scores
  walkover <tournament> <match> <side>    Award a match to side first or second
  regroup <tournament>                    Create the second league phase
  standings <tournament>                  Print the league table
  placements <tournament>                 Print the final ranking
  show <tournament>                       Print the full tournament state

OPTIONS:
  --db-url       URL       Database connection string  [default: env DATABASE_URL]
  --lock-timeout SECS      Wait for a busy tournament  [default: env TT_LOCK_TIMEOUT_SECS or 5]
  --starts-at    RFC3339   First game day for create   [default: now]
  --rating       N         Rating for register         [default: 0]
  --weight       N         Rating weight for register  [default: 0]
  --nationality  CODE      Nationality for register
  --seed         N         Reproducible regroup tie-break

FLAGS:
  --migrate                Apply pending schema migrations first
  -h, --help               Print help information

ENVIRONMENT:
  DATABASE_URL             PostgreSQL connection string
  DB_MAX_CONNECTIONS       Pool size
  TT_LOCK_TIMEOUT_SECS     Lock timeout in seconds
  RUST_LOG                 Log filter (logs go to stderr)
";

enum Command {
    Create {
        name: String,
        format: TournamentFormat,
        starts_at: DateTime<Utc>,
    },
    Register {
        tournament: TournamentId,
        player: NewParticipant,
    },
    Enroll {
        tournament: TournamentId,
        participant: ParticipantId,
    },
    Team {
        tournament: TournamentId,
        name: String,
    },
    Start(TournamentId),
    Generate(TournamentId),
    Sets {
        tournament: TournamentId,
        match_id: MatchId,
        sets: Vec<SetScore>,
    },
    Rubbers {
        tournament: TournamentId,
        match_id: MatchId,
        rubbers: Vec<Rubber>,
    },
    Report {
        tournament: TournamentId,
        match_id: MatchId,
    },
    Walkover {
        tournament: TournamentId,
        match_id: MatchId,
        winner: Side,
    },
    Regroup {
        tournament: TournamentId,
        seed: Option<u64>,
    },
    Standings(TournamentId),
    Placements(TournamentId),
    Show(TournamentId),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Register { .. } => "register",
            Command::Enroll { .. } => "enroll",
            Command::Team { .. } => "team",
            Command::Start(_) => "start",
            Command::Generate(_) => "generate",
            Command::Sets { .. } => "sets",
            Command::Rubbers { .. } => "rubbers",
            Command::Report { .. } => "report",
            Command::Walkover { .. } => "walkover",
            Command::Regroup { .. } => "regroup",
            Command::Standings(_) => "standings",
            Command::Placements(_) => "placements",
            Command::Show(_) => "show",
        }
    }
}

struct Args {
    database_url: Option<String>,
    lock_timeout_secs: Option<u64>,
    migrate: bool,
    command: Command,
}

/// Acknowledgement for commands that only store scores
#[derive(Serialize)]
struct Recorded {
    tournament: TournamentId,
    match_id: MatchId,
    entries: usize,
}

fn parse_rubber(s: &str) -> Result<Rubber, EngineError> {
    let sets = s
        .split(',')
        .map(str::parse)
        .collect::<Result<Vec<SetScore>, _>>()?;
    Ok(Rubber { sets })
}

/// Trailing free arguments, parsed one by one
fn trailing<T>(pargs: Arguments, parse: fn(&str) -> Result<T, EngineError>) -> Result<Vec<T>, Error> {
    let values = pargs
        .finish()
        .into_iter()
        .map(|arg| {
            let arg = arg
                .into_string()
                .map_err(|arg| anyhow!("argument {arg:?} is not valid UTF-8"))?;
            parse(&arg).map_err(Error::from)
        })
        .collect::<Result<Vec<T>, Error>>()?;
    if values.is_empty() {
        bail!("expected at least one score, see --help");
    }
    Ok(values)
}

fn parse_args() -> Result<Args, Error> {
    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let database_url = pargs.opt_value_from_str("--db-url")?;
    let lock_timeout_secs = pargs.opt_value_from_str("--lock-timeout")?;
    let migrate = pargs.contains("--migrate");
    let starts_at: Option<DateTime<Utc>> = pargs.opt_value_from_str("--starts-at")?;
    let rating: Option<i32> = pargs.opt_value_from_str("--rating")?;
    let weight: Option<i32> = pargs.opt_value_from_str("--weight")?;
    let nationality: Option<String> = pargs.opt_value_from_str("--nationality")?;
    let seed: Option<u64> = pargs.opt_value_from_str("--seed")?;

    let name = pargs
        .subcommand()?
        .context("missing command, see --help")?;

    let command = match name.as_str() {
        "create" => Command::Create {
            name: pargs.free_from_str()?,
            format: pargs.free_from_fn(TournamentFormat::from_type)?,
            starts_at: starts_at.unwrap_or_else(Utc::now),
        },
        "register" => Command::Register {
            tournament: pargs.free_from_str()?,
            player: NewParticipant {
                name: pargs.free_from_str()?,
                rating: rating.unwrap_or(0),
                weight: weight.unwrap_or(0),
                nationality,
            },
        },
        "enroll" => Command::Enroll {
            tournament: pargs.free_from_str()?,
            participant: pargs.free_from_str()?,
        },
        "team" => Command::Team {
            tournament: pargs.free_from_str()?,
            name: pargs.free_from_str()?,
        },
        "start" => Command::Start(pargs.free_from_str()?),
        "generate" => Command::Generate(pargs.free_from_str()?),
        "sets" => {
            let tournament = pargs.free_from_str()?;
            let match_id = pargs.free_from_str()?;
            Command::Sets {
                tournament,
                match_id,
                sets: trailing(pargs, str::parse::<SetScore>)?,
            }
        }
        "rubbers" => {
            let tournament = pargs.free_from_str()?;
            let match_id = pargs.free_from_str()?;
            Command::Rubbers {
                tournament,
                match_id,
                rubbers: trailing(pargs, parse_rubber)?,
            }
        }
        "report" => Command::Report {
            tournament: pargs.free_from_str()?,
            match_id: pargs.free_from_str()?,
        },
        "walkover" => Command::Walkover {
            tournament: pargs.free_from_str()?,
            match_id: pargs.free_from_str()?,
            winner: pargs.free_from_str()?,
        },
        "regroup" => Command::Regroup {
            tournament: pargs.free_from_str()?,
            seed,
        },
        "standings" => Command::Standings(pargs.free_from_str()?),
        "placements" => Command::Placements(pargs.free_from_str()?),
        "show" => Command::Show(pargs.free_from_str()?),
        other => bail!("unknown command '{other}', see --help"),
    };

    Ok(Args {
        database_url,
        lock_timeout_secs,
        migrate,
        command,
    })
}

async fn run(manager: &TournamentManager, command: Command) -> Result<Value, Error> {
    let output = match command {
        Command::Create {
            name,
            format,
            starts_at,
        } => serde_json::to_value(
            manager
                .create_tournament(NewTournament {
                    name,
                    format,
                    starts_at,
                })
                .await?,
        )?,
        Command::Register { tournament, player } => {
            serde_json::to_value(manager.register_participant(tournament, player).await?)?
        }
        Command::Enroll {
            tournament,
            participant,
        } => serde_json::to_value(manager.enroll_participant(tournament, participant).await?)?,
        Command::Team { tournament, name } => {
            serde_json::to_value(manager.register_team(tournament, &name).await?)?
        }
        Command::Start(tournament) => serde_json::to_value(manager.start_tournament(tournament).await?)?,
        Command::Generate(tournament) => serde_json::to_value(manager.generate(tournament).await?)?,
        Command::Sets {
            tournament,
            match_id,
            sets,
        } => {
            let entries = sets.len();
            manager.record_sets(tournament, match_id, sets).await?;
            serde_json::to_value(Recorded {
                tournament,
                match_id,
                entries,
            })?
        }
        Command::Rubbers {
            tournament,
            match_id,
            rubbers,
        } => {
            let entries = rubbers.len();
            manager.record_rubbers(tournament, match_id, rubbers).await?;
            serde_json::to_value(Recorded {
                tournament,
                match_id,
                entries,
            })?
        }
        Command::Report {
            tournament,
            match_id,
        } => serde_json::to_value(manager.report_result(tournament, match_id).await?)?,
        Command::Walkover {
            tournament,
            match_id,
            winner,
        } => serde_json::to_value(manager.report_walkover(tournament, match_id, winner).await?)?,
        Command::Regroup { tournament, seed } => {
            let created = match seed {
                Some(seed) => manager.regroup_seeded(tournament, seed).await?,
                None => manager.regroup(tournament).await?,
            };
            serde_json::to_value(created)?
        }
        Command::Standings(tournament) => serde_json::to_value(manager.standings(tournament).await?)?,
        Command::Placements(tournament) => serde_json::to_value(manager.placements(tournament).await?)?,
        Command::Show(tournament) => {
            let snapshot = manager.snapshot(tournament).await?;
            serde_json::to_value(snapshot.view())?
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let args = parse_args()?;

    // Catching signals for exit.
    set_handler(|| std::process::exit(0))?;

    logging::init();

    let config = AdminConfig::from_env(args.database_url, args.lock_timeout_secs)?;
    config.validate()?;

    let db = Database::new(&config.database)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;
    if args.migrate {
        db.migrate().await.context("Failed to create schema")?;
        info!("Schema is up to date");
    }

    let repository = Arc::new(PgTournamentRepository::new(db.pool().clone()));
    let manager = TournamentManager::with_config(repository, config.manager.clone());

    let operation = args.command.name();
    let started = Instant::now();
    let result = run(&manager, args.command).await;
    logging::log_performance(operation, started.elapsed().as_millis() as u64, None);
    db.close().await;

    let output = result.map_err(|err| match err.downcast::<TournamentError>() {
        Ok(err) => {
            tracing::error!(operation = operation, "{err:?}");
            anyhow!(err.client_message())
        }
        Err(err) => err,
    })?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rubber() {
        let rubber = parse_rubber("11-7,9-11,11:5").unwrap();
        assert_eq!(
            rubber.sets,
            vec![SetScore::new(11, 7), SetScore::new(9, 11), SetScore::new(11, 5)]
        );
        assert_eq!(rubber.winner(), None);

        assert!(parse_rubber("11-7,eleven").is_err());
    }

    #[test]
    fn test_help_lists_every_command() {
        for command in [
            "create", "register", "enroll", "team", "start", "generate", "sets", "rubbers",
            "report", "walkover", "regroup", "standings", "placements", "show",
        ] {
            assert!(HELP.contains(&format!("  {command} ")), "{command} missing from help");
        }
    }
}

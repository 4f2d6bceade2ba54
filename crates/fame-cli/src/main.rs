use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fame_core::{
    Advance, EnrollmentController, EnrollmentState, OptionState, Orientation, PersonRepository,
    QuizRound, QuizSession,
};
use fame_store::{seed_defaults, FsImageStore, LaunchState, SqlitePersonRepository};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

mod config;
mod engine;

use config::Config;

#[derive(Parser)]
#[command(name = "fame", about = "Learn the faces and names of the people you meet")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a person from a photo
    Enroll {
        /// Photo containing the person's face
        photo: PathBuf,
        /// Name to remember
        #[arg(short, long)]
        name: String,
        /// Which detected face to use when the photo has several (see output)
        #[arg(long)]
        face: Option<usize>,
        /// Orientation of the stored pixels (up, down, left, right, *-mirrored)
        #[arg(long, default_value = "up")]
        orientation: Orientation,
        /// Write each candidate face crop here as face-<N>.png
        #[arg(long)]
        preview_dir: Option<PathBuf>,
    },
    /// List everyone in the gallery
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Change a person's name
    Rename {
        id: Uuid,
        name: String,
    },
    /// Remove a person and their captured face image
    Remove {
        id: Uuid,
    },
    /// Play the name quiz
    Quiz {
        /// Stop after this many rounds
        #[arg(long)]
        rounds: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Enroll {
            photo,
            name,
            face,
            orientation,
            preview_dir,
        } => enroll(&config, &photo, &name, face, orientation, preview_dir.as_deref()).await,
        Commands::List { json } => list(&config, json),
        Commands::Rename { id, name } => rename(&config, id, &name),
        Commands::Remove { id } => remove(&config, id),
        Commands::Quiz { rounds } => quiz(&config, rounds).await,
    }
}

/// Open the person database (seeding it on first launch) and the image store.
fn open_stores(config: &Config) -> Result<(SqlitePersonRepository, FsImageStore)> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut repo = SqlitePersonRepository::open(&config.db_path)?;

    if config.seed_defaults {
        let mut state = LaunchState::load(&config.state_path)?;
        if seed_defaults(&mut repo, &mut state)? {
            state.save(&config.state_path)?;
        }
    }

    let images = FsImageStore::open(&config.image_dir, &config.asset_dir)?;
    Ok((repo, images))
}

async fn enroll(
    config: &Config,
    photo: &Path,
    name: &str,
    face: Option<usize>,
    orientation: Orientation,
    preview_dir: Option<&Path>,
) -> Result<()> {
    let bytes = std::fs::read(photo).with_context(|| format!("reading {}", photo.display()))?;
    let engine = engine::spawn_engine(&config.scrfd_model_path())?;

    let mut controller = EnrollmentController::new();
    let request = controller.load_photo(&bytes, orientation)?;
    let outcome = engine.detect(request).await?;
    controller.apply_detection(outcome)?;

    match controller.state() {
        EnrollmentState::NoFacesFound => {
            println!("No faces were detected. Please choose another image.");
            return Ok(());
        }
        EnrollmentState::MultipleFacesPendingSelection { candidates } => {
            if let Some(dir) = preview_dir {
                std::fs::create_dir_all(dir)?;
                for (i, candidate) in candidates.iter().enumerate() {
                    let path = dir.join(format!("face-{i}.png"));
                    candidate
                        .image
                        .save(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                }
            }

            let Some(index) = face else {
                println!("Several faces found; pick one with --face <N>:");
                for (i, candidate) in candidates.iter().enumerate() {
                    println!("  [{i}] {}", candidate.bounding_box);
                }
                return Ok(());
            };
            let bbox = candidates
                .get(index)
                .map(|c| c.bounding_box)
                .with_context(|| format!("no face {index}; {} were found", candidates.len()))?;
            controller.select_face(&bbox)?;
        }
        EnrollmentState::FaceChosen { .. } => {}
        other => bail!("enrollment stopped while {}", other.name()),
    }

    let (mut repo, mut images) = open_stores(config)?;
    let person = controller.save(name, &mut images, &mut repo)?;
    println!("Enrolled {} ({})", person.name, person.id);
    Ok(())
}

fn list(config: &Config, json: bool) -> Result<()> {
    let (repo, images) = open_stores(config)?;
    let people = repo.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&people)?);
        return Ok(());
    }
    if people.is_empty() {
        println!("No people in database. Add some with `fame enroll`.");
        return Ok(());
    }
    for person in &people {
        let image = match &person.image {
            Some(key) => match images.path_of(key) {
                Some(path) => path.display().to_string(),
                None => format!("{key} (missing)"),
            },
            None => "-".to_string(),
        };
        println!("{}  {:<20}  {}", person.id, person.name, image);
    }
    Ok(())
}

fn rename(config: &Config, id: Uuid, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("a name is required");
    }
    let (mut repo, _) = open_stores(config)?;
    let person = repo.update(id, name)?;
    println!("Renamed {} to {}", person.id, person.name);
    Ok(())
}

fn remove(config: &Config, id: Uuid) -> Result<()> {
    use fame_core::ImageStore;

    let (mut repo, mut images) = open_stores(config)?;
    let person = repo
        .get(id)?
        .with_context(|| format!("no person with id {id}"))?;
    repo.delete(id)?;

    if let Some(key) = &person.image {
        if let Err(e) = images.remove(key) {
            tracing::warn!(error = %e, image = %key, "could not remove face image");
        }
    }
    println!("Removed {}", person.name);
    Ok(())
}

async fn quiz(config: &Config, rounds: Option<u32>) -> Result<()> {
    let (repo, images) = open_stores(config)?;
    let mut run = QuizRun::new(rounds);
    let mut rng = rand::thread_rng();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    'rounds: while run.has_rounds_left() {
        let people = repo.list()?;
        let round = match run.session.advance(&people, &mut rng) {
            Advance::Round(round) => round.clone(),
            Advance::Ended if run.played == 0 => {
                println!("No people in database. Add some with `fame enroll`.");
                return Ok(());
            }
            Advance::Ended => {
                println!("Game over!");
                break;
            }
        };

        let picture = round
            .target
            .image
            .as_ref()
            .and_then(|key| images.path_of(key))
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(image unavailable)".to_string());
        println!("\nWho is this? {picture}");
        for (i, option) in round.options.iter().enumerate() {
            println!("  {}) {option}", i + 1);
        }

        let chosen = loop {
            let Some(line) = lines.next_line().await? else {
                println!("Final score: {}", run.session.score());
                return Ok(());
            };
            let line = line.trim();
            if line.eq_ignore_ascii_case("q") {
                println!("Final score: {}", run.session.score());
                return Ok(());
            }
            if line.eq_ignore_ascii_case("r") {
                run.restart();
                println!("Restarted. Score: 0");
                continue 'rounds;
            }
            match parse_choice(line, &round.options) {
                Some(name) => break name,
                None => println!("Pick 1-{} (r to restart, q to quit)", round.options.len()),
            }
        };

        run.session.answer(&chosen)?;
        if let Some(revealed) = run.session.round() {
            print!("{}", render_feedback(revealed));
        }
        println!("Score: {}", run.session.score());

        tokio::time::sleep(config.feedback_delay).await;
        run.played += 1;
    }

    println!("Final score: {}", run.session.score());
    Ok(())
}

/// A quiz session and its `--rounds` budget; restarting resets both.
struct QuizRun {
    session: QuizSession,
    limit: Option<u32>,
    played: u32,
}

impl QuizRun {
    fn new(limit: Option<u32>) -> Self {
        Self {
            session: QuizSession::new(),
            limit,
            played: 0,
        }
    }

    fn has_rounds_left(&self) -> bool {
        self.limit.map_or(true, |max| self.played < max)
    }

    fn restart(&mut self) {
        self.session.restart();
        self.played = 0;
    }
}

/// Accept a 1-based option number or an exact (case-insensitive) name.
fn parse_choice(input: &str, options: &[String]) -> Option<String> {
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| options.get(i)).cloned();
    }
    options
        .iter()
        .find(|o| o.eq_ignore_ascii_case(input))
        .cloned()
}

fn render_feedback(round: &QuizRound) -> String {
    round
        .options
        .iter()
        .map(|option| {
            let marker = match round.classify(option) {
                OptionState::ChosenCorrect => "✔ correct",
                OptionState::ChosenIncorrect => "✘ wrong",
                OptionState::CorrectNotChosen => "← answer",
                OptionState::Neutral => "",
            };
            format!("  {option:<20} {marker}\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fame_core::{ImageRef, Person};

    fn options() -> Vec<String> {
        vec!["Alice".into(), "Bob".into(), "Carol".into()]
    }

    #[test]
    fn test_parse_choice_by_number() {
        assert_eq!(parse_choice("2", &options()).as_deref(), Some("Bob"));
        assert_eq!(parse_choice("0", &options()), None);
        assert_eq!(parse_choice("4", &options()), None);
    }

    #[test]
    fn test_parse_choice_by_name() {
        assert_eq!(parse_choice("carol", &options()).as_deref(), Some("Carol"));
        assert_eq!(parse_choice("Dave", &options()), None);
    }

    #[test]
    fn test_render_feedback_marks_answer() {
        let round = QuizRound {
            target: Person {
                id: Uuid::nil(),
                name: "Alice".into(),
                image: Some(ImageRef::new("alice")),
            },
            options: options(),
            revealed: true,
            chosen_name: Some("Bob".into()),
        };
        let text = render_feedback(&round);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("← answer"));
        assert!(lines[1].contains("✘ wrong"));
        assert!(!lines[2].contains('✔'));
    }

    #[test]
    fn test_restart_resets_round_budget() {
        let people = vec![Person {
            id: Uuid::nil(),
            name: "Alice".into(),
            image: Some(ImageRef::new("alice")),
        }];
        let mut rng = rand::thread_rng();
        let mut run = QuizRun::new(Some(2));

        for _ in 0..2 {
            assert!(run.has_rounds_left());
            run.session.advance(&people, &mut rng);
            run.session.answer("Alice").unwrap();
            run.played += 1;
        }
        assert!(!run.has_rounds_left());
        assert_eq!(run.session.score(), 2);

        run.restart();
        assert!(run.has_rounds_left());
        assert_eq!(run.played, 0);
        assert_eq!(run.session.score(), 0);
    }

    #[test]
    fn test_unlimited_rounds() {
        let run = QuizRun { played: 1_000, ..QuizRun::new(None) };
        assert!(run.has_rounds_left());
    }

    #[test]
    fn test_cli_parses_enroll() {
        let cli = Cli::try_parse_from([
            "fame", "enroll", "photo.jpg", "--name", "Alice", "--face", "1", "--orientation", "right",
        ])
        .unwrap();
        match cli.command {
            Commands::Enroll { face, orientation, .. } => {
                assert_eq!(face, Some(1));
                assert_eq!(orientation, Orientation::Right);
            }
            _ => panic!("expected enroll"),
        }
    }
}

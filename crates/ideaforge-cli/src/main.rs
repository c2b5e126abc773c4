use std::env;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use ideaforge_contracts::chat::{chat_help_lines, parse_command, ChatCommand};
use ideaforge_contracts::events::{EventPayload, SessionEvent};
use ideaforge_contracts::library::archive::DEFAULT_ARCHIVE_FILE_NAME;
use ideaforge_contracts::views::{DataUrl, ModelView, ViewSet};
use ideaforge_engine::visualizer::VisualizerAction;
use ideaforge_engine::{build_client, Action, ColorMode, EngineConfig, Studio, Variations};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "ideaforge", version, about = "3D-print model idea generator")]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Key-value store holding saved models and inspiration settings.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Event log; defaults to `events.jsonl` next to the store.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// `gemini` or `dryrun`.
    #[arg(long, global = true)]
    backend: Option<String>,
    #[arg(long, global = true)]
    text_model: Option<String>,
    #[arg(long, global = true)]
    image_edit_model: Option<String>,
    #[arg(long, global = true)]
    image_model: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session driven by slash commands.
    Session,
    /// Generate one batch of ideas and print them.
    Ideas(IdeasArgs),
    /// List saved models.
    Saved,
    /// Delete a saved model by its 1-based position.
    Delete { index: usize },
    Export(ExportArgs),
    Import(ImportArgs),
}

#[derive(Debug, Parser)]
struct IdeasArgs {
    /// Keywords every idea must be built around.
    #[arg(long)]
    focus: Vec<String>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long, default_value = DEFAULT_ARCHIVE_FILE_NAME)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct ImportArgs {
    path: PathBuf,
    /// Replace the library without asking.
    #[arg(long)]
    yes: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ideaforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut studio = open_studio(&cli.engine)?;
    match cli.command {
        Command::Session => {
            run_session(&mut studio)?;
            Ok(0)
        }
        Command::Ideas(args) => {
            studio.dispatch(Action::RequestIdeas { focus: args.focus })?;
            print_ideas(&studio);
            Ok(exit_code(&studio))
        }
        Command::Saved => {
            print_saved(&studio);
            Ok(0)
        }
        Command::Delete { index } => {
            let id = match saved_id(&studio, index) {
                Ok(id) => id,
                Err(message) => {
                    eprintln!("{message}");
                    return Ok(1);
                }
            };
            studio.dispatch(Action::DeleteSavedModel { id })?;
            println!("Deleted saved model #{index}");
            Ok(0)
        }
        Command::Export(args) => {
            let path = studio.export_to(&args.out)?;
            println!("Exported to {}", path.display());
            Ok(0)
        }
        Command::Import(args) => {
            studio.load_import(&args.path)?;
            if studio.state().pending_import().is_none() {
                print_error(&studio);
                return Ok(1);
            }
            print_pending_import(&studio);
            if args.yes || confirm("Replace the current library?")? {
                studio.dispatch(Action::ConfirmImport)?;
                println!("Imported {}", args.path.display());
            } else {
                studio.dispatch(Action::CancelImport)?;
                println!("Import cancelled");
            }
            Ok(0)
        }
    }
}

fn open_studio(args: &EngineArgs) -> Result<Studio> {
    let mut config = EngineConfig::from_env();
    if let Some(backend) = &args.backend {
        config.backend = backend.trim().to_string();
    }
    if args.text_model.is_some() {
        config.text_model = args.text_model.clone();
    }
    if args.image_edit_model.is_some() {
        config.image_edit_model = args.image_edit_model.clone();
    }
    if args.image_model.is_some() {
        config.image_model = args.image_model.clone();
    }
    let (client, warnings) = build_client(&config)?;
    for warning in &warnings {
        eprintln!("model fallback: {warning}");
    }

    let store = args
        .store
        .clone()
        .unwrap_or_else(|| default_store_path(env::var_os("HOME").map(PathBuf::from)));
    let events = args.events.clone().unwrap_or_else(|| {
        store
            .parent()
            .map(|dir| dir.join("events.jsonl"))
            .unwrap_or_else(|| PathBuf::from("events.jsonl"))
    });
    let studio = Studio::open(client, &store, &events)
        .with_context(|| format!("failed opening store {}", store.display()))?;
    for warning in studio.warnings() {
        eprintln!("storage recovered: {warning}");
    }
    Ok(studio.with_observer(Box::new(|event: SessionEvent, payload: &EventPayload| {
        if let Some(line) = progress_line(event, payload) {
            println!("{line}");
        }
    })))
}

fn default_store_path(home: Option<PathBuf>) -> PathBuf {
    match home {
        Some(home) => home.join(".ideaforge").join("store.json"),
        None => PathBuf::from("ideaforge-store.json"),
    }
}

fn run_session(studio: &mut Studio) -> Result<()> {
    println!("ideaforge: type ideas to brainstorm, or /help");
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;
        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        let input = line.trim_end_matches(['\n', '\r']);
        if !handle_command(studio, parse_command(input))? {
            break;
        }
    }
    Ok(())
}

/// Runs one command. Returns `false` when the session should end.
fn handle_command(studio: &mut Studio, command: ChatCommand) -> Result<bool> {
    match command {
        ChatCommand::Noop => {}
        ChatCommand::Quit => return Ok(false),
        ChatCommand::Help => {
            println!("Commands:");
            for line in chat_help_lines() {
                println!("  {line}");
            }
        }
        ChatCommand::Status => print_status(studio),
        ChatCommand::Dismiss => studio.dispatch(Action::DismissError)?,
        ChatCommand::Ideas { focus } => {
            studio.dispatch(Action::RequestIdeas { focus })?;
            print_ideas(studio);
        }
        ChatCommand::Visualize { idea } => match pick(studio.state().ideas(), idea, "idea") {
            Ok(text) => {
                let text = text.clone();
                studio.dispatch(Action::VisualizeIdea {
                    idea: text.clone(),
                    force: true,
                })?;
                print_variations(studio, &text);
            }
            Err(message) => println!("{message}"),
        },
        ChatCommand::Views { idea, variation } => {
            let chosen = pick(studio.state().ideas(), idea, "idea").and_then(|text| {
                let Some(Variations::Ready(images)) = studio.state().variations().get(text) else {
                    return Err(format!("Visualize idea #{idea} first"));
                };
                let front = pick(images, variation, "variation")?;
                Ok((text.clone(), front.clone()))
            });
            match chosen {
                Ok((idea, front)) => {
                    studio.dispatch(Action::GenerateViews { idea, front })?;
                    print_error(studio);
                    print_models(studio);
                }
                Err(message) => println!("{message}"),
            }
        }
        ChatCommand::Save { model } => match model_key(studio, model) {
            Ok(front) => {
                studio.save_model(&front)?;
                println!("Saved model #{model}");
            }
            Err(message) => println!("{message}"),
        },
        ChatCommand::Saved => print_saved(studio),
        ChatCommand::Delete { saved } => match saved_id(studio, saved) {
            Ok(id) => {
                studio.dispatch(Action::DeleteSavedModel { id })?;
                println!("Deleted saved model #{saved}");
            }
            Err(message) => println!("{message}"),
        },
        ChatCommand::Download { model, dir } => match model_key(studio, model) {
            Ok(front) => report_written(studio.download_model(&front, &target_dir(dir))),
            Err(message) => println!("{message}"),
        },
        ChatCommand::DownloadSaved { saved, dir } => match saved_id(studio, saved) {
            Ok(id) => report_written(studio.download_saved(&id, &target_dir(dir))),
            Err(message) => println!("{message}"),
        },
        ChatCommand::Keywords => print_keywords(studio),
        ChatCommand::Include { keywords } => {
            studio.dispatch(Action::AddKeywords(keywords))?;
            print_keywords(studio);
        }
        ChatCommand::Exclude { keywords } => {
            studio.dispatch(Action::AddExcluded(keywords))?;
            print_keywords(studio);
        }
        ChatCommand::Uninclude { keywords } => {
            studio.dispatch(Action::RemoveKeywords(keywords))?;
            print_keywords(studio);
        }
        ChatCommand::Unexclude { keywords } => {
            studio.dispatch(Action::RemoveExcluded(keywords))?;
            print_keywords(studio);
        }
        ChatCommand::InspirationImage { path } => {
            studio.set_inspiration_image(path.as_deref().map(Path::new))?;
            print_error(studio);
            print_keywords(studio);
        }
        ChatCommand::ExtractFromImage => {
            studio.dispatch(Action::ExtractKeywordsFromImage)?;
            print_error(studio);
            print_keywords(studio);
        }
        ChatCommand::ExtractFromIdeas => {
            studio.dispatch(Action::ExtractKeywordsFromIdeas)?;
            print_error(studio);
            print_keywords(studio);
        }
        ChatCommand::Export { path } => {
            let path = path
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_FILE_NAME));
            let written = studio.export_to(&path)?;
            println!("Exported to {}", written.display());
        }
        ChatCommand::Import { path } => {
            studio.load_import(Path::new(&path))?;
            if studio.state().pending_import().is_some() {
                print_pending_import(studio);
                println!("Type /confirm to replace the current library or /cancel to keep it.");
            } else {
                print_error(studio);
            }
        }
        ChatCommand::ConfirmImport => {
            if studio.state().pending_import().is_none() {
                println!("No import is waiting for confirmation");
            } else {
                studio.dispatch(Action::ConfirmImport)?;
                println!("Library replaced");
            }
        }
        ChatCommand::CancelImport => {
            studio.dispatch(Action::CancelImport)?;
            println!("Import cancelled");
        }
        ChatCommand::Upload { paths } => {
            let paths: Vec<PathBuf> = paths.into_iter().map(PathBuf::from).collect();
            studio.upload_images(&paths)?;
            print_error(studio);
            print_visualizer(studio);
        }
        ChatCommand::AddSlot => {
            visualizer(studio, VisualizerAction::AddSlot)?;
        }
        ChatCommand::RemoveSlot { slot } => match slot_id(studio, slot) {
            Ok(id) => visualizer(studio, VisualizerAction::RemoveSlot(id))?,
            Err(message) => println!("{message}"),
        },
        ChatCommand::ClearSlots => visualizer(studio, VisualizerAction::ClearSlots)?,
        ChatCommand::SetMultiColor { multi } => {
            let mode = if multi {
                ColorMode::Multi
            } else {
                ColorMode::Single
            };
            visualizer(studio, VisualizerAction::SetColorMode(mode))?;
        }
        ChatCommand::SetLayerLines { on } => {
            visualizer(studio, VisualizerAction::SetLayerLines(on))?;
        }
        ChatCommand::Render => visualizer(studio, VisualizerAction::Generate)?,
        ChatCommand::Rerender { slot } => match slot_id(studio, slot) {
            Ok(id) => visualizer(studio, VisualizerAction::Rerender(id))?,
            Err(message) => println!("{message}"),
        },
        ChatCommand::RenderAll => visualizer(studio, VisualizerAction::RegenerateAll)?,
        ChatCommand::Listing => {
            studio.dispatch(Action::Visualizer(VisualizerAction::GenerateListing))?;
            print_error(studio);
            if let Some(listing) = &studio.state().visualizer().listing {
                println!("Title: {}", listing.title);
                println!("Description: {}", listing.description);
                println!("Tags: {}", listing.tags.join(", "));
            }
        }
        ChatCommand::DownloadUpload { slot, dir } => {
            if slot == 0 {
                println!("No slot #0");
            } else {
                report_written(
                    studio
                        .download_upload(slot - 1, &target_dir(dir))
                        .map(|path| vec![path]),
                );
            }
        }
        ChatCommand::DownloadUploads { dir } => {
            report_written(studio.download_uploads(&target_dir(dir)));
        }
        ChatCommand::Unknown { command, .. } => {
            println!("Unknown command /{command}. Type /help for the list.");
        }
        ChatCommand::Invalid { usage, .. } => println!("Usage: {usage}"),
    }
    Ok(true)
}

fn visualizer(studio: &mut Studio, action: VisualizerAction) -> Result<()> {
    studio.dispatch(Action::Visualizer(action))?;
    print_error(studio);
    print_visualizer(studio);
    Ok(())
}

/// 1-based lookup with a printable miss.
fn pick<'a, T>(items: &'a [T], index: usize, what: &str) -> Result<&'a T, String> {
    index
        .checked_sub(1)
        .and_then(|position| items.get(position))
        .ok_or_else(|| format!("No {what} #{index} (have {})", items.len()))
}

fn model_key(studio: &Studio, index: usize) -> Result<DataUrl, String> {
    let keys: Vec<_> = studio.state().generated().keys().collect();
    pick(&keys, index, "model").map(|key| (*key).clone())
}

fn saved_id(studio: &Studio, index: usize) -> Result<String, String> {
    pick(&studio.state().library().saved_models, index, "saved model")
        .map(|saved| saved.id.clone())
}

fn slot_id(studio: &Studio, index: usize) -> Result<u64, String> {
    pick(studio.state().visualizer().slots(), index, "slot").map(|slot| slot.id)
}

fn target_dir(dir: Option<String>) -> PathBuf {
    dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn exit_code(studio: &Studio) -> i32 {
    if studio.state().error().is_some() {
        1
    } else {
        0
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn views_summary(images: &ViewSet) -> String {
    ModelView::ALL
        .iter()
        .map(|view| {
            if images.get(*view).is_some() {
                view.as_str().to_string()
            } else {
                format!("({})", view.as_str())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn payload_text<'a>(payload: &'a EventPayload, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn progress_line(event: SessionEvent, payload: &EventPayload) -> Option<String> {
    match event {
        SessionEvent::VariationsReady => Some(format!(
            "  {} front views ready for \"{}\"",
            payload.get("count").and_then(Value::as_u64).unwrap_or(0),
            payload_text(payload, "idea")
        )),
        SessionEvent::ViewReady => Some(format!("  {} view ready", payload_text(payload, "view"))),
        SessionEvent::SceneDescribed => Some("  scene described".to_string()),
        SessionEvent::RealisticRendered => {
            Some(format!("  rendered {}", payload_text(payload, "label")))
        }
        SessionEvent::GenerationRetry => Some(format!(
            "  service busy, retry {} of {}",
            payload.get("retry").and_then(Value::as_u64).unwrap_or(0),
            payload.get("retries").and_then(Value::as_u64).unwrap_or(0)
        )),
        _ => None,
    }
}

fn report_written(result: Result<Vec<PathBuf>>) {
    match result {
        Ok(paths) if paths.is_empty() => println!("Nothing to download"),
        Ok(paths) => {
            for path in paths {
                println!("Wrote {}", path.display());
            }
        }
        Err(err) => println!("Download failed: {err:#}"),
    }
}

fn print_error(studio: &Studio) {
    if let Some(error) = studio.state().error() {
        println!("Error: {error} (/dismiss to clear)");
    }
}

fn print_ideas(studio: &Studio) {
    print_error(studio);
    for (index, idea) in studio.state().ideas().iter().enumerate() {
        println!("{}. {idea}", index + 1);
    }
}

fn print_variations(studio: &Studio, idea: &str) {
    print_error(studio);
    if let Some(Variations::Ready(images)) = studio.state().variations().get(idea) {
        println!(
            "{} front views for \"{idea}\"; pick one with /views <idea> <1-{}>",
            images.len(),
            images.len()
        );
    }
}

fn print_models(studio: &Studio) {
    for (index, model) in studio.state().generated().values().enumerate() {
        let saved = if model.is_saved { " [saved]" } else { "" };
        println!(
            "{}. {}{saved}: {}",
            index + 1,
            model.idea,
            views_summary(&model.images)
        );
    }
}

fn print_saved(studio: &Studio) {
    let saved = &studio.state().library().saved_models;
    if saved.is_empty() {
        println!("No saved models");
        return;
    }
    for (index, model) in saved.iter().enumerate() {
        let when = chrono_label(model.timestamp);
        println!(
            "{}. {} ({when}): {}",
            index + 1,
            model.idea,
            views_summary(&model.images)
        );
    }
}

fn chrono_label(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|when| when.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn print_keywords(studio: &Studio) {
    let inspiration = &studio.state().library().inspiration;
    println!("Inspiration: {}", inspiration.keywords().join(", "));
    println!("Excluded: {}", inspiration.excluded().join(", "));
    if inspiration.image().is_some() {
        println!("Inspiration image: set");
    }
}

fn print_pending_import(studio: &Studio) {
    let Some(pending) = studio.state().pending_import() else {
        return;
    };
    println!(
        "Import holds {} saved models, {} inspiration keywords, {} excluded keywords",
        pending.library.saved_models.len(),
        pending.library.inspiration.keywords().len(),
        pending.library.inspiration.excluded().len()
    );
    if !pending.defaulted.is_empty() {
        println!("Defaulted fields: {}", pending.defaulted.join(", "));
    }
}

fn print_visualizer(studio: &Studio) {
    let visualizer = studio.state().visualizer();
    println!(
        "Color: {}, layer lines: {}",
        visualizer.color_mode.as_str(),
        if visualizer.layer_lines { "on" } else { "off" }
    );
    for (index, slot) in visualizer.slots().iter().enumerate() {
        let upload = if slot.upload.is_some() { "uploaded" } else { "empty" };
        let render = if slot.render.is_some() { ", rendered" } else { "" };
        println!("  angle {}: {upload}{render}", index + 1);
    }
}

fn print_status(studio: &Studio) {
    let state = studio.state();
    println!(
        "Backend: {} (text {}, image edit {}, image {})",
        studio.client().backend_name(),
        studio.client().models().text,
        studio.client().models().image_edit,
        studio.client().models().image_generation
    );
    println!("Store: {}", studio.store_path().display());
    println!(
        "Ideas this session: {}, saved models: {}",
        state.session_ideas().len(),
        state.library().saved_models.len()
    );
    print_ideas(studio);
    print_models(studio);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ideaforge_contracts::chat::parse_command;
    use ideaforge_contracts::events::SessionEvent;
    use ideaforge_contracts::views::{DataUrl, ModelView, ViewSet};
    use ideaforge_engine::{build_client, EngineConfig, Studio};

    use super::{default_store_path, handle_command, pick, progress_line, views_summary};

    fn dryrun_studio(dir: &std::path::Path) -> anyhow::Result<Studio> {
        let mut config = EngineConfig::from_lookup(|key| {
            (key == "IDEAFORGE_RETRY_BASE_MS").then(|| "0".to_string())
        });
        config.backend = "dryrun".to_string();
        let (client, _) = build_client(&config)?;
        Studio::open(client, dir.join("store.json"), dir.join("events.jsonl"))
    }

    #[test]
    fn pick_is_one_based() {
        let items = ["a", "b"];
        assert_eq!(pick(&items, 1, "idea"), Ok(&"a"));
        assert_eq!(pick(&items, 0, "idea"), Err("No idea #0 (have 2)".to_string()));
        assert!(pick(&items, 3, "idea").is_err());
    }

    #[test]
    fn store_defaults_under_home() {
        assert_eq!(
            default_store_path(Some(PathBuf::from("/home/maker"))),
            PathBuf::from("/home/maker/.ideaforge/store.json")
        );
        assert_eq!(default_store_path(None), PathBuf::from("ideaforge-store.json"));
    }

    #[test]
    fn views_summary_marks_missing_views() {
        let mut images = ViewSet::with_front(DataUrl::from_bytes("image/png", b"f"));
        images.set(ModelView::Left, DataUrl::from_bytes("image/png", b"l"));
        assert_eq!(views_summary(&images), "front left (right) (back)");
    }

    #[test]
    fn progress_lines_cover_view_events() {
        let payload = ideaforge_contracts::events::payload(serde_json::json!({"view": "left"}));
        assert_eq!(
            progress_line(SessionEvent::ViewReady, &payload).as_deref(),
            Some("  left view ready")
        );
        assert!(progress_line(SessionEvent::ModelSaved, &payload).is_none());
    }

    #[test]
    fn session_commands_drive_dryrun_pipeline() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut studio = dryrun_studio(temp.path())?;
        let out = temp.path().join("downloads");
        let download = format!("/download_saved 1 \"{}\"", out.display());

        for line in [
            "/ideas",
            "/visualize 1",
            "/views 1 2",
            "/save 1",
            download.as_str(),
            "/exclude dragon",
        ] {
            assert!(handle_command(&mut studio, parse_command(line))?);
        }
        assert!(studio.state().error().is_none());
        assert_eq!(studio.state().library().saved_models.len(), 1);
        assert_eq!(std::fs::read_dir(&out)?.count(), 4);
        assert!(studio
            .state()
            .library()
            .inspiration
            .excluded()
            .contains(&"dragon".to_string()));

        assert!(!handle_command(&mut studio, parse_command("/quit"))?);
        Ok(())
    }

    #[test]
    fn download_uploads_writes_every_upload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut studio = dryrun_studio(temp.path())?;
        let first = temp.path().join("front.png");
        let second = temp.path().join("side.png");
        std::fs::write(&first, b"front")?;
        std::fs::write(&second, b"side")?;
        let out = temp.path().join("uploads");
        let upload = format!("/upload \"{}\" \"{}\"", first.display(), second.display());
        let download = format!("/download_uploads \"{}\"", out.display());

        for line in [upload.as_str(), download.as_str()] {
            assert!(handle_command(&mut studio, parse_command(line))?);
        }
        assert!(out.join("uploaded_angle_1.png").exists());
        assert!(out.join("uploaded_angle_2.png").exists());
        Ok(())
    }
}

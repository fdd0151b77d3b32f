// src/main.rs

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rehearsal_engine::audio::CpalOutput;
use rehearsal_engine::controller::RehearsalController;
use rehearsal_engine::{analyze_bpm_for_file, JsonSongStore, RehearsalConfig, RehearsalSession, SongStore};

const USAGE: &str = "usage: rehearse [--config <file>] <song id or title>
       rehearse [--config <file>] --list
       rehearse [--config <file>] --analyze <audio file>";

enum Mode {
    Play(String),
    List,
    Analyze(PathBuf),
}

fn parse_args() -> Result<(Option<PathBuf>, Mode), anyhow::Error> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut mode = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(args.next().ok_or_else(|| anyhow::anyhow!(USAGE))?));
            }
            "--list" | "-l" => mode = Some(Mode::List),
            "--analyze" | "-a" => {
                mode = Some(Mode::Analyze(PathBuf::from(args.next().ok_or_else(|| anyhow::anyhow!(USAGE))?)));
            }
            "--help" | "-h" => anyhow::bail!(USAGE),
            _ => mode = Some(Mode::Play(arg)),
        }
    }

    Ok((config, mode.ok_or_else(|| anyhow::anyhow!(USAGE))?))
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let (config_path, mode) = parse_args()?;
    let config = RehearsalConfig::load(config_path.as_deref())?;
    let store = Arc::new(JsonSongStore::new(&config.store.data_file, &config.store.uploads_dir));

    match mode {
        Mode::List => {
            for song in store.songs()? {
                let kinds: Vec<String> = song.tracks.iter().map(|t| t.kind.label()).collect();
                println!("{}  {}  [{}]", song.id, song.title, kinds.join(", "));
            }
            Ok(())
        }
        Mode::Analyze(path) => {
            let res = analyze_bpm_for_file(&path, &config.analysis)?;
            println!("BPM: {} ({} {})", res.tempo.bpm, res.tempo.time_signature, res.tempo.beat_value);
            for beat in &res.beats.markers {
                println!("{:>9.4}s  {}", beat.time, beat.position);
            }
            Ok(())
        }
        Mode::Play(key) => run_player(store, &config, &key),
    }
}

fn run_player(store: Arc<JsonSongStore>, config: &RehearsalConfig, key: &str) -> Result<(), anyhow::Error> {
    let output = CpalOutput::open()?;
    let mut session = RehearsalSession::new(store, output, config);
    session.load_song(key)?;

    let mut app = RehearsalController::new(session);

    enable_raw_mode()?;
    let result = event_loop(&mut app);
    disable_raw_mode()?;
    println!("\n🛑 Exiting.");
    result
}

fn event_loop(app: &mut RehearsalController<CpalOutput>) -> Result<(), anyhow::Error> {
    // Target 20 FPS (50ms per frame)
    let target_frame_duration = Duration::from_millis(50);

    app.run_tick()?;

    loop {
        // 1. Process input, waiting at most one frame
        if event::poll(target_frame_duration)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind == KeyEventKind::Press {
                    if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
                        break;
                    }
                    if app.should_quit(ev.code) {
                        break;
                    }
                    app.handle_key(ev.code, ev.modifiers);
                }
            }
        }

        // 2. Redraw
        app.run_tick()?;
    }
    Ok(())
}

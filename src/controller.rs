// src/controller.rs

use std::fmt::Write as FmtWrite;
use std::io::{stdout, Write};

use crossterm::event::{KeyCode, KeyModifiers};
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{BeginSynchronizedUpdate, Clear, ClearType, EndSynchronizedUpdate},
};

use crate::engine::{AudioOutput, MixControl, TransportStatus};
use crate::error::RehearsalError;
use crate::session::{RehearsalSession, SlotStatus};

const VOLUME_STEP: f32 = 0.1;
const PAN_STEP: f32 = 0.1;

/// Terminal front end: turns key presses into session gestures and redraws
/// the transport state every tick.
pub struct RehearsalController<O: AudioOutput> {
    session: RehearsalSession<O>,
    selected: usize,
    message: Option<String>,
    draw_buffer: String,
}

impl<O: AudioOutput> RehearsalController<O> {
    pub fn new(session: RehearsalSession<O>) -> Self {
        Self {
            session,
            selected: 0,
            message: None,
            draw_buffer: String::with_capacity(4096),
        }
    }

    pub fn session(&self) -> &RehearsalSession<O> {
        &self.session
    }

    pub fn should_quit(&self, key: KeyCode) -> bool {
        matches!(key, KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc)
    }

    pub fn handle_key(&mut self, key: KeyCode, _modifiers: KeyModifiers) {
        match key {
            KeyCode::Char(' ') => self.toggle_play_pause(),
            KeyCode::Char('s') | KeyCode::Char('S') => self.session.transport_mut().stop(),
            KeyCode::Left => self.seek_by_bars(-1.0),
            KeyCode::Right => self.seek_by_bars(1.0),
            KeyCode::Home => self.session.transport_mut().seek(0.0),
            KeyCode::Char('c') | KeyCode::Char('C') => {
                let enabled = !self.session.transport().click_enabled();
                self.session.transport_mut().set_click_enabled(enabled);
            }

            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                let last = self.session.slots().len().saturating_sub(1);
                self.selected = (self.selected + 1).min(last);
            }

            KeyCode::Char('m') | KeyCode::Char('M') => self.adjust_selected(|m| MixControl::Mute(!m.muted)),
            KeyCode::Char('o') | KeyCode::Char('O') => self.adjust_selected(|m| MixControl::Solo(!m.soloed)),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.adjust_selected(|m| MixControl::Volume(m.volume + VOLUME_STEP))
            }
            KeyCode::Char('-') => self.adjust_selected(|m| MixControl::Volume(m.volume - VOLUME_STEP)),
            KeyCode::Char('[') => self.adjust_selected(|m| MixControl::Pan(m.pan - PAN_STEP)),
            KeyCode::Char(']') => self.adjust_selected(|m| MixControl::Pan(m.pan + PAN_STEP)),
            _ => {}
        }
    }

    fn toggle_play_pause(&mut self) {
        self.message = match self.session.toggle_play() {
            Ok(()) => None,
            Err(RehearsalError::NotReady { pending }) => {
                Some(format!("⏳ Still loading ({pending} track(s) left), try again in a moment"))
            }
            Err(e) => Some(format!("⚠️ {e}")),
        };
    }

    fn seek_by_bars(&mut self, bars: f64) {
        let transport = self.session.transport_mut();
        let target = transport.position_seconds() + bars * transport.tempo().seconds_per_bar();
        transport.seek(target);
    }

    fn adjust_selected<F>(&mut self, control: F)
    where
        F: FnOnce(crate::engine::TrackMixState) -> MixControl,
    {
        let Some(id) = self.session.slots().get(self.selected).map(|s| s.id) else {
            return;
        };
        let current = self.session.transport().mix_state(id);
        self.session.transport_mut().set_mix(id, control(current));
    }

    pub fn run_tick(&mut self) -> Result<(), anyhow::Error> {
        // 1. Logic tick
        let before = self.session.transport().status();
        let after = self.session.refresh();
        if before == TransportStatus::Playing && after == TransportStatus::Stopped {
            self.message = Some("🎵 Song finished.".into());
        }

        // 2. Build output buffer
        self.draw_buffer.clear();
        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 0));
        self.render_header();
        self.render_tracks();
        self.render_footer();

        // 3. Flush to terminal
        let mut stdout = stdout();
        execute!(stdout, BeginSynchronizedUpdate)?;
        stdout.write_all(self.draw_buffer.as_bytes())?;
        execute!(stdout, Clear(ClearType::FromCursorDown), EndSynchronizedUpdate)?;
        stdout.flush()?;
        Ok(())
    }

    fn line(&mut self, text: &str) {
        let _ = write!(self.draw_buffer, "{text}{}\r\n", Clear(ClearType::UntilNewLine));
    }

    fn render_header(&mut self) {
        let title = match self.session.song() {
            Some(song) => match &song.voicing {
                Some(v) if !v.is_empty() => format!("🎵 {} ({v})", song.title),
                _ => format!("🎵 {}", song.title),
            },
            None => "🎵 No song loaded".to_string(),
        };
        self.line(&title);

        let transport = self.session.transport();
        let pos = transport.position_seconds();
        let total = transport.duration();
        let tempo = transport.tempo();
        let icon = match transport.status() {
            TransportStatus::Playing => "▶",
            TransportStatus::Paused => "⏸",
            TransportStatus::Stopped => "⏹",
        };
        let grid = match self.session.analysis() {
            Some(a) if a.is_detected() => format!("{} beats", a.beats.len()),
            _ => "no grid".to_string(),
        };
        let status = format!(
            "{icon} {}  {:02}:{:04.1} / {:02}:{:02} | BPM: {:5.1} {} | {grid} | Click: {}",
            transport.musical_position(),
            (pos / 60.0) as u64,
            pos % 60.0,
            (total / 60.0) as u64,
            (total % 60.0) as u64,
            tempo.bpm,
            tempo.signature,
            if transport.click_enabled() { "on" } else { "off" },
        );
        self.line(&status);

        let pending = self.session.pending();
        if pending > 0 {
            self.line(&format!("Loading {pending} track(s)..."));
        } else {
            self.line("");
        }
    }

    fn render_tracks(&mut self) {
        let rows: Vec<String> = self
            .session
            .slots()
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let mix = self.session.transport().mix_state(slot.id);
                let state = match &slot.status {
                    SlotStatus::Loading => "loading".to_string(),
                    SlotStatus::Ready => "ready".to_string(),
                    SlotStatus::Failed(e) => format!("failed: {e}"),
                };
                format!(
                    "{} {:<12} [{}{}] vol:{:>3}% pan:{:+.2}  {state}",
                    if i == self.selected { ">" } else { " " },
                    slot.record.kind.label(),
                    if mix.muted { "M" } else { "-" },
                    if mix.soloed { "S" } else { "-" },
                    (mix.volume * 100.0).round() as i32,
                    mix.pan,
                )
            })
            .collect();
        for row in rows {
            self.line(&row);
        }
    }

    fn render_footer(&mut self) {
        self.line("");
        self.line("[SPACE] Play/Pause | [S] Stop | [←/→] Bar | [Home] Start | [C] Click | [Q] Quit");
        self.line("[↑/↓] Track | [M] Mute | [O] Solo | [+/-] Volume | [ [ / ] ] Pan");
        let message = self.message.clone().unwrap_or_default();
        self.line(&message);
    }
}

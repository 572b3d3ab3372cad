use std::collections::{HashMap, HashSet};

use crate::diag::{Diagnostic, Severity};
use crate::interp::ExecCtx;
use crate::pen::{PenLayer, PenStroke};
use crate::sound::SoundCommand;
use crate::sprite::Sprite;
use crate::stage::{InputSnapshot, Stage};
use crate::value::Value;

/// A question a script asked. The embedder shows it and calls
/// [`Runtime::submit_ask`] with whatever the user typed.
#[derive(Clone, PartialEq, Debug)]
pub struct AskRequest {
    pub prompt: String,
    pub sprite: usize,
}

/// Flags and slots shared by every script in a run.
#[derive(Clone, Debug, Default)]
pub struct ExecState {
    pub running: bool,
    pub paused: bool,
    pub step_mode: bool,
    pub step_pending: bool,
    pub watchdog: u32,
    pub global_timer: f32,
    pub pending_broadcast: Option<String>,
    pub ask: Option<AskRequest>,
    pub green_flag_clicked: bool,
}

/// The state handle. The editor builds sprites and scripts through it, the
/// embedder drives it one `tick` per frame, and the renderer reads it
/// through the accessors without ever mutating execution state.
pub struct Runtime {
    pub(crate) stage: Stage,
    pub(crate) sprites: Vec<Sprite>,
    pub(crate) pen: PenLayer,
    pub(crate) input: InputSnapshot,
    pub(crate) prev_keys: HashSet<String>,
    pub(crate) selected_sprite: usize,
    pub(crate) exec: ExecState,
    pub(crate) contexts: Vec<ExecCtx>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) sound_queue: Vec<SoundCommand>,
}

impl Runtime {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            stage: Stage::new(width, height),
            sprites: Vec::new(),
            pen: PenLayer::new(),
            input: InputSnapshot::default(),
            prev_keys: HashSet::new(),
            selected_sprite: 0,
            exec: ExecState::default(),
            contexts: Vec::new(),
            diagnostics: Vec::new(),
            sound_queue: Vec::new(),
        }
    }

    // ----- project editing -----

    /// Add a sprite at its home position and return its index.
    pub fn add_sprite(&mut self, name: impl Into<String>, x: f32, y: f32) -> usize {
        self.sprites.push(Sprite::new(name, x, y));
        self.sprites.len() - 1
    }

    pub fn sprite_mut(&mut self, index: usize) -> Option<&mut Sprite> {
        self.sprites.get_mut(index)
    }

    pub fn stage_mut(&mut self) -> &mut Stage {
        &mut self.stage
    }

    /// Which sprite the editor has focused. Pen capture follows this one.
    pub fn select_sprite(&mut self, index: usize) {
        if index < self.sprites.len() {
            self.selected_sprite = index;
        }
    }

    /// Window coordinates of the stage's top-left corner, so mouse sensors
    /// can translate pointer positions into stage space.
    pub fn set_stage_viewport(&mut self, x: f32, y: f32) {
        self.stage.viewport_origin = (x, y);
    }

    // ----- external input -----

    pub fn set_input_snapshot(
        &mut self,
        mouse_x: f32,
        mouse_y: f32,
        mouse_down: bool,
        pressed_keys: HashSet<String>,
    ) {
        self.input = InputSnapshot {
            mouse_x,
            mouse_y,
            mouse_down,
            pressed_keys,
        };
    }

    pub fn click_green_flag(&mut self) {
        self.exec.green_flag_clicked = true;
    }

    /// The embedder resolved a pointer-down to this sprite's costume rect.
    pub fn click_sprite(&mut self, index: usize) {
        if self.exec.running && index < self.sprites.len() {
            self.arm_sprite_click(index);
        }
    }

    /// Deliver the user's answer to the pending question. The asking
    /// sprite remembers it and its script resumes on the next tick.
    pub fn submit_ask(&mut self, text: impl Into<String>) {
        if let Some(req) = self.exec.ask.take() {
            if let Some(sp) = self.sprites.get_mut(req.sprite) {
                sp.answer = text.into();
            }
        }
    }

    // ----- run control -----

    /// Reset run state, put every sprite back home and arm the starting
    /// scripts. Variables and the pen layer persist between runs.
    pub fn start(&mut self) {
        self.exec.running = true;
        self.exec.paused = false;
        self.exec.step_mode = false;
        self.exec.step_pending = false;
        self.exec.watchdog = 0;
        self.exec.global_timer = 0.0;
        self.exec.pending_broadcast = None;
        self.exec.ask = None;
        self.contexts.clear();
        for sp in &mut self.sprites {
            sp.reset_to_home();
        }
        self.pen.close_stroke();
        self.arm_start_scripts();
        log::info!("execution started with {} sprite(s)", self.sprites.len());
    }

    pub fn stop(&mut self) {
        self.exec.running = false;
        self.exec.paused = false;
        self.exec.pending_broadcast = None;
        self.exec.ask = None;
        self.contexts.clear();
        self.pen.close_stroke();
    }

    pub fn pause(&mut self) {
        if self.exec.running {
            self.exec.paused = true;
        }
    }

    pub fn resume(&mut self) {
        self.exec.paused = false;
        self.exec.step_mode = false;
        self.exec.step_pending = false;
    }

    /// While paused, release exactly one instruction on the next tick.
    pub fn step_once(&mut self) {
        if self.exec.running && self.exec.paused {
            self.exec.step_mode = true;
            self.exec.step_pending = true;
        }
    }

    pub fn reset_pen(&mut self) {
        self.pen.clear();
    }

    /// Full project reset: stop, restore every sprite, wipe the pen layer,
    /// variables, diagnostics and the timer.
    pub fn reset_all(&mut self) {
        self.stop();
        for sp in &mut self.sprites {
            sp.reset_to_home();
            sp.clear_effects();
            sp.answer.clear();
        }
        self.pen.clear();
        self.stage.variables.clear();
        self.stage.variable_visible.clear();
        self.diagnostics.clear();
        self.sound_queue.clear();
        self.exec.global_timer = 0.0;
    }

    // ----- read-only surface -----

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn sprites(&self) -> &[Sprite] {
        &self.sprites
    }

    pub fn sprite(&self, index: usize) -> Option<&Sprite> {
        self.sprites.get(index)
    }

    pub fn selected_sprite(&self) -> usize {
        self.selected_sprite
    }

    pub fn pen_strokes(&self) -> Vec<&PenStroke> {
        self.pen.strokes()
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.stage.variables
    }

    pub fn variable(&self, name: &str) -> Value {
        self.stage.variable(name)
    }

    pub fn current_ask(&self) -> Option<&AskRequest> {
        self.exec.ask.as_ref()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn clear_diagnostics(&mut self) {
        self.diagnostics.clear();
    }

    /// Hand the queued mixer commands to the host, emptying the queue.
    pub fn drain_sound_commands(&mut self) -> Vec<SoundCommand> {
        std::mem::take(&mut self.sound_queue)
    }

    pub fn is_running(&self) -> bool {
        self.exec.running
    }

    pub fn is_paused(&self) -> bool {
        self.exec.paused
    }

    pub fn timer(&self) -> f32 {
        self.exec.global_timer
    }

    /// Pointer position translated into stage coordinates.
    pub fn mouse_stage_pos(&self) -> (f32, f32) {
        let (ox, oy) = self.stage.viewport_origin;
        (
            self.input.mouse_x - ox - self.stage.width / 2.0,
            oy + self.stage.height / 2.0 - self.input.mouse_y,
        )
    }

    pub(crate) fn push_diag(&mut self, diag: Diagnostic) {
        match diag.severity() {
            Severity::Warning => log::warn!("{}", diag),
            Severity::Error => log::error!("{}", diag),
        }
        self.diagnostics.push(diag);
    }
}

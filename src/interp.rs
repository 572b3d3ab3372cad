use rand::Rng;

use crate::block::{Block, Expr};
use crate::diag::Diagnostic;
use crate::runtime::{AskRequest, Runtime};
use crate::sound::SoundCommand;

/// Dispatches allowed without any suspension before the run is declared an
/// infinite loop.
pub const WATCHDOG_LIMIT: u32 = 10_000;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum FrameKind {
    /// If / IfElse: run the chosen body once.
    Once,
    Repeat,
    RepeatUntil,
    Forever,
}

/// One level of nested control flow. The frame owns the body it is
/// walking and its own instruction pointer.
#[derive(Clone, Debug)]
pub struct LoopFrame {
    pub kind: FrameKind,
    pub body: Vec<Block>,
    pub ip: usize,
    pub remaining: u32,
    pub predicate: Option<Expr>,
}

/// Execution state of one armed script. Arming snapshots the script's
/// blocks so editor changes mid-run cannot move a live program counter.
#[derive(Clone, Debug, Default)]
pub struct ExecCtx {
    pub sprite: usize,
    pub script: Vec<Block>,
    pub pc: usize,
    pub frames: Vec<LoopFrame>,
    pub wait_timer: Option<f32>,
    pub waiting_until: bool,
    pub ask_waiting: bool,
    pub finished: bool,
}

impl ExecCtx {
    pub fn new(sprite: usize, script: Vec<Block>) -> Self {
        Self {
            sprite,
            script,
            ..Default::default()
        }
    }

    /// The block the program counter points at, inside the innermost open
    /// frame if there is one.
    pub fn current(&self) -> Option<&Block> {
        match self.frames.last() {
            Some(frame) => frame.body.get(frame.ip),
            None => self.script.get(self.pc),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.wait_timer.is_some() || self.waiting_until || self.ask_waiting
    }

    /// Whether the program counter currently sits at top level rather than
    /// inside a loop body.
    pub fn at_top_level(&self) -> bool {
        self.frames.is_empty()
    }

    fn bump(&mut self) {
        match self.frames.last_mut() {
            Some(frame) => frame.ip += 1,
            None => self.pc += 1,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Flow {
    Continue,
    Suspended,
    Finished,
}

impl Runtime {
    /// Execute the instruction at the context's program counter, then move
    /// the counter unless the instruction suspended. Control blocks open a
    /// frame instead of advancing; the frame bookkeeping in [`advance`]
    /// closes them.
    pub(crate) fn execute_one(&mut self, ctx: &mut ExecCtx) -> Flow {
        if ctx.sprite >= self.sprites.len() {
            ctx.finished = true;
            return Flow::Finished;
        }
        let Some(block) = ctx.current().cloned() else {
            ctx.finished = true;
            return Flow::Finished;
        };

        self.exec.watchdog += 1;
        if self.exec.watchdog > WATCHDOG_LIMIT {
            let dispatches = self.exec.watchdog;
            self.push_diag(Diagnostic::InfiniteLoop { dispatches });
            self.exec.running = false;
            ctx.finished = true;
            return Flow::Finished;
        }

        match block {
            // Hat blocks are arming markers, not instructions.
            Block::WhenFlagClicked
            | Block::WhenKeyPressed(_)
            | Block::WhenSpriteClicked
            | Block::WhenBroadcast(_) => {}

            // Motion
            Block::Move(steps) => {
                let steps = self.eval_expr(ctx.sprite, &steps).to_number() as f32;
                self.pen_track_sprite(ctx.sprite);
                let (hw, hh) = (self.stage.half_width(), self.stage.half_height());
                let sp = &mut self.sprites[ctx.sprite];
                let rad = (sp.direction - 90.0).to_radians();
                sp.x += steps * rad.cos();
                sp.y += steps * rad.sin();
                sp.clamp_to_stage(hw, hh);
                self.pen_track_sprite(ctx.sprite);
            }
            Block::TurnLeft(deg) => {
                let deg = self.eval_expr(ctx.sprite, &deg).to_number() as f32;
                self.sprites[ctx.sprite].turn(-deg);
            }
            Block::TurnRight(deg) => {
                let deg = self.eval_expr(ctx.sprite, &deg).to_number() as f32;
                self.sprites[ctx.sprite].turn(deg);
            }
            Block::GoToXY { x, y } => {
                let nx = self.eval_expr(ctx.sprite, &x).to_number() as f32;
                let ny = self.eval_expr(ctx.sprite, &y).to_number() as f32;
                self.place_sprite(ctx.sprite, nx, ny);
            }
            Block::SetX(x) => {
                let nx = self.eval_expr(ctx.sprite, &x).to_number() as f32;
                let ny = self.sprites[ctx.sprite].y;
                self.place_sprite(ctx.sprite, nx, ny);
            }
            Block::SetY(y) => {
                let nx = self.sprites[ctx.sprite].x;
                let ny = self.eval_expr(ctx.sprite, &y).to_number() as f32;
                self.place_sprite(ctx.sprite, nx, ny);
            }
            Block::ChangeX(dx) => {
                let dx = self.eval_expr(ctx.sprite, &dx).to_number() as f32;
                let sp = &self.sprites[ctx.sprite];
                let (nx, ny) = (sp.x + dx, sp.y);
                self.place_sprite(ctx.sprite, nx, ny);
            }
            Block::ChangeY(dy) => {
                let dy = self.eval_expr(ctx.sprite, &dy).to_number() as f32;
                let sp = &self.sprites[ctx.sprite];
                let (nx, ny) = (sp.x, sp.y + dy);
                self.place_sprite(ctx.sprite, nx, ny);
            }
            Block::PointDirection(deg) => {
                let deg = self.eval_expr(ctx.sprite, &deg).to_number() as f32;
                self.sprites[ctx.sprite].set_direction(deg);
            }
            Block::GoToMouse => {
                let (mx, my) = self.mouse_stage_pos();
                self.place_sprite(ctx.sprite, mx, my);
            }
            Block::GoToRandom => {
                let (hw, hh) = (self.stage.half_width(), self.stage.half_height());
                let mut rng = rand::thread_rng();
                let (nx, ny) = (rng.gen_range(-hw..hw), rng.gen_range(-hh..hh));
                self.place_sprite(ctx.sprite, nx, ny);
            }
            Block::BounceOffEdge => {
                let (hw, hh) = (self.stage.half_width(), self.stage.half_height());
                let sp = &mut self.sprites[ctx.sprite];
                let at_h = sp.x <= -hw || sp.x >= hw;
                let at_v = sp.y <= -hh || sp.y >= hh;
                if at_h || at_v {
                    let rad = (sp.direction - 90.0).to_radians();
                    let mut dx = rad.cos();
                    let mut dy = rad.sin();
                    if at_h {
                        dx = -dx;
                    }
                    if at_v {
                        dy = -dy;
                    }
                    sp.set_direction(dy.atan2(dx).to_degrees() + 90.0);
                }
            }

            // Looks
            Block::Say(text) => {
                let text = self.eval_expr(ctx.sprite, &text).to_text();
                self.sprites[ctx.sprite].say(text, false, -1.0);
            }
            Block::SayFor { text, secs } => {
                let text = self.eval_expr(ctx.sprite, &text).to_text();
                let secs = self.eval_expr(ctx.sprite, &secs).to_number() as f32;
                let sp = &mut self.sprites[ctx.sprite];
                if secs > 0.0 {
                    sp.say(text, false, secs);
                } else {
                    sp.speech = None;
                }
            }
            Block::Think(text) => {
                let text = self.eval_expr(ctx.sprite, &text).to_text();
                self.sprites[ctx.sprite].say(text, true, -1.0);
            }
            Block::ThinkFor { text, secs } => {
                let text = self.eval_expr(ctx.sprite, &text).to_text();
                let secs = self.eval_expr(ctx.sprite, &secs).to_number() as f32;
                let sp = &mut self.sprites[ctx.sprite];
                if secs > 0.0 {
                    sp.say(text, true, secs);
                } else {
                    sp.speech = None;
                }
            }
            Block::Show => self.sprites[ctx.sprite].visible = true,
            Block::Hide => self.sprites[ctx.sprite].visible = false,
            Block::SwitchCostume(name) => {
                if !self.sprites[ctx.sprite].switch_costume(&name) {
                    self.push_diag(Diagnostic::UnknownCostume(name));
                }
            }
            Block::NextCostume => self.sprites[ctx.sprite].next_costume(),
            Block::SwitchBackdrop(name) => {
                if name == "next" {
                    self.stage.next_backdrop();
                } else if !self.stage.switch_backdrop(&name) {
                    self.push_diag(Diagnostic::UnknownBackdrop(name));
                }
            }
            Block::SetSize(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as f32;
                self.sprites[ctx.sprite].set_size(v);
            }
            Block::ChangeSize(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as f32;
                let sp = &mut self.sprites[ctx.sprite];
                let size = sp.size;
                sp.set_size(size + v);
            }
            Block::SetEffect { effect, value } => {
                let v = self.eval_expr(ctx.sprite, &value).to_number() as f32;
                self.sprites[ctx.sprite].set_effect(effect, v);
            }
            Block::ChangeEffect { effect, value } => {
                let v = self.eval_expr(ctx.sprite, &value).to_number() as f32;
                let sp = &mut self.sprites[ctx.sprite];
                let current = sp.effect(effect);
                sp.set_effect(effect, current + v);
            }
            Block::ClearGraphicEffects => self.sprites[ctx.sprite].clear_effects(),
            Block::GoToFrontLayer => self.sprites[ctx.sprite].layer = 999,
            Block::GoToBackLayer => self.sprites[ctx.sprite].layer = -999,
            Block::GoForwardLayers(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as i32;
                self.sprites[ctx.sprite].layer += v;
            }
            Block::GoBackwardLayers(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as i32;
                self.sprites[ctx.sprite].layer -= v;
            }

            // Sound
            Block::PlaySound(name) => self.queue_sound(ctx.sprite, name, false),
            Block::PlaySoundUntilDone(name) => self.queue_sound(ctx.sprite, name, true),
            Block::StopAllSounds => self.sound_queue.push(SoundCommand::StopAll),
            Block::SetVolume(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as f32;
                self.stage.set_volume(v);
                self.sound_queue.push(SoundCommand::SetVolume(self.stage.volume));
            }
            Block::ChangeVolume(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as f32;
                let volume = self.stage.volume + v;
                self.stage.set_volume(volume);
                self.sound_queue.push(SoundCommand::SetVolume(self.stage.volume));
            }

            // Events
            Block::Broadcast(name) => {
                log::info!("broadcast \"{}\"", name);
                self.exec.pending_broadcast = Some(name);
            }

            // Control
            Block::Wait(secs) => {
                let secs = self.eval_expr(ctx.sprite, &secs).to_number() as f32;
                ctx.wait_timer = Some(secs);
                self.exec.watchdog = 0;
                return Flow::Suspended;
            }
            Block::WaitUntil(_) => {
                ctx.waiting_until = true;
                self.exec.watchdog = 0;
                return Flow::Suspended;
            }
            Block::Repeat { count, body } => {
                let n = self.eval_expr(ctx.sprite, &count).to_number().floor();
                if n < 1.0 {
                    return self.advance(ctx);
                }
                return self.enter_body(ctx, FrameKind::Repeat, body, n as u32, None);
            }
            Block::RepeatUntil { condition, body } => {
                if self.eval_expr(ctx.sprite, &condition).to_bool() {
                    return self.advance(ctx);
                }
                return self.enter_body(ctx, FrameKind::RepeatUntil, body, 0, Some(condition));
            }
            Block::Forever { body } => {
                return self.enter_body(ctx, FrameKind::Forever, body, 0, None);
            }
            Block::If {
                condition,
                then_body,
            } => {
                if self.eval_expr(ctx.sprite, &condition).to_bool() {
                    return self.enter_body(ctx, FrameKind::Once, then_body, 1, None);
                }
                return self.advance(ctx);
            }
            Block::IfElse {
                condition,
                then_body,
                else_body,
            } => {
                let body = if self.eval_expr(ctx.sprite, &condition).to_bool() {
                    then_body
                } else {
                    else_body
                };
                return self.enter_body(ctx, FrameKind::Once, body, 1, None);
            }
            Block::StopAll => {
                log::info!("stop all");
                self.exec.running = false;
                ctx.finished = true;
                return Flow::Finished;
            }

            // Sensing
            Block::AskAndWait(prompt) => {
                let prompt = self.eval_expr(ctx.sprite, &prompt).to_text();
                self.exec.ask = Some(AskRequest {
                    prompt,
                    sprite: ctx.sprite,
                });
                ctx.ask_waiting = true;
                self.exec.watchdog = 0;
                return Flow::Suspended;
            }
            Block::ResetTimer => self.exec.global_timer = 0.0,
            Block::SetDragMode(draggable) => self.sprites[ctx.sprite].is_draggable = draggable,

            // Variables
            Block::SetVariable { name, value } => {
                let v = self.eval_expr(ctx.sprite, &value);
                self.stage.set_variable(&name, v);
            }
            Block::ChangeVariable { name, value } => {
                let delta = self.eval_expr(ctx.sprite, &value).to_number();
                self.stage.change_variable(&name, delta);
            }
            Block::ShowVariable(name) => {
                self.stage.variable_visible.insert(name, true);
            }
            Block::HideVariable(name) => {
                self.stage.variable_visible.insert(name, false);
            }

            // Pen
            Block::PenDown => {
                self.sprites[ctx.sprite].pen_down = true;
                self.pen_track_sprite(ctx.sprite);
            }
            Block::PenUp => {
                self.sprites[ctx.sprite].pen_down = false;
                if ctx.sprite == self.selected_sprite {
                    self.pen.close_stroke();
                }
            }
            Block::EraseAll => self.pen.clear(),
            Block::Stamp => {
                let sp = &self.sprites[ctx.sprite];
                self.pen.stamp((sp.x, sp.y), sp.pen_color);
            }
            Block::SetPenColor { r, g, b } => {
                self.sprites[ctx.sprite].pen_color = [r, g, b];
            }
            Block::SetPenSize(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as i64;
                self.sprites[ctx.sprite].pen_size = v.clamp(1, 50) as u32;
            }
            Block::ChangePenSize(v) => {
                let v = self.eval_expr(ctx.sprite, &v).to_number() as i64;
                let sp = &mut self.sprites[ctx.sprite];
                sp.pen_size = (sp.pen_size as i64 + v).clamp(1, 50) as u32;
            }
        }

        self.advance(ctx)
    }

    /// Move the program counter past the instruction just finished and
    /// settle any frames that completed because of it.
    pub(crate) fn advance(&mut self, ctx: &mut ExecCtx) -> Flow {
        ctx.bump();
        self.settle(ctx)
    }

    fn enter_body(
        &mut self,
        ctx: &mut ExecCtx,
        kind: FrameKind,
        body: Vec<Block>,
        remaining: u32,
        predicate: Option<Expr>,
    ) -> Flow {
        if body.is_empty() {
            // an empty body would only spin; treat the block as a no-op
            return self.advance(ctx);
        }
        ctx.frames.push(LoopFrame {
            kind,
            body,
            ip: 0,
            remaining,
            predicate,
        });
        Flow::Continue
    }

    /// Close every frame whose body instruction pointer ran off the end,
    /// cascading into parents. Loops rewind here instead of closing.
    fn settle(&mut self, ctx: &mut ExecCtx) -> Flow {
        loop {
            let (body_done, kind) = match ctx.frames.last() {
                None => {
                    if ctx.pc >= ctx.script.len() {
                        ctx.finished = true;
                        return Flow::Finished;
                    }
                    return Flow::Continue;
                }
                Some(frame) => (frame.ip >= frame.body.len(), frame.kind),
            };
            if !body_done {
                return Flow::Continue;
            }
            match kind {
                FrameKind::Once => {
                    ctx.frames.pop();
                    ctx.bump();
                }
                FrameKind::Repeat => {
                    if let Some(frame) = ctx.frames.last_mut() {
                        frame.remaining = frame.remaining.saturating_sub(1);
                        if frame.remaining > 0 {
                            frame.ip = 0;
                            return Flow::Continue;
                        }
                    }
                    ctx.frames.pop();
                    ctx.bump();
                }
                FrameKind::RepeatUntil => {
                    let predicate = ctx.frames.last().and_then(|f| f.predicate.clone());
                    let exit = match predicate {
                        Some(p) => self.eval_expr(ctx.sprite, &p).to_bool(),
                        None => true,
                    };
                    if exit {
                        ctx.frames.pop();
                        ctx.bump();
                    } else if let Some(frame) = ctx.frames.last_mut() {
                        frame.ip = 0;
                        return Flow::Continue;
                    }
                }
                FrameKind::Forever => {
                    if let Some(frame) = ctx.frames.last_mut() {
                        frame.ip = 0;
                    }
                    return Flow::Continue;
                }
            }
        }
    }

    fn place_sprite(&mut self, sprite: usize, x: f32, y: f32) {
        self.pen_track_sprite(sprite);
        let (hw, hh) = (self.stage.half_width(), self.stage.half_height());
        let sp = &mut self.sprites[sprite];
        sp.x = x;
        sp.y = y;
        sp.clamp_to_stage(hw, hh);
        self.pen_track_sprite(sprite);
    }

    fn queue_sound(&mut self, sprite: usize, name: String, until_done: bool) {
        let sp = &self.sprites[sprite];
        if !sp.sounds.iter().any(|s| s == &name) {
            self.push_diag(Diagnostic::UnknownSound(name));
            return;
        }
        let sprite_name = sp.name.clone();
        let cmd = if until_done {
            SoundCommand::PlayUntilDone {
                sprite: sprite_name,
                sound: name,
            }
        } else {
            SoundCommand::Play {
                sprite: sprite_name,
                sound: name,
            }
        };
        self.sound_queue.push(cmd);
    }

    /// Record the selected sprite's position onto the pen layer when its
    /// pen is down. Called around every position write so strokes keep
    /// every vertex rather than one sample per frame.
    pub(crate) fn pen_track_sprite(&mut self, sprite: usize) {
        if sprite != self.selected_sprite {
            return;
        }
        let Some(sp) = self.sprites.get(sprite) else {
            return;
        };
        if sp.pen_down {
            self.pen.track((sp.x, sp.y), sp.pen_color, sp.pen_size);
        }
    }
}

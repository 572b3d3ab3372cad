use crate::block::Block;
use crate::interp::Flow;
use crate::runtime::Runtime;

/// Top-level instructions one context may complete per tick before it
/// yields to the next frame. Loop bodies run inside their control block's
/// turn and are bounded by the watchdog instead.
pub const FRAME_BUDGET: usize = 200;

impl Runtime {
    /// Advance the whole runtime by one frame. Call once per rendered
    /// frame with the elapsed seconds.
    pub fn tick(&mut self, dt: f32) {
        // speech bubbles count down before any instruction runs, so a
        // bubble that expires this frame is gone next frame
        for sp in &mut self.sprites {
            if let Some(speech) = &mut sp.speech {
                if speech.timer > 0.0 {
                    speech.timer -= dt;
                    if speech.timer <= 0.0 {
                        sp.speech = None;
                    }
                }
            }
        }

        if self.exec.running {
            self.exec.global_timer += dt;
        }

        if self.exec.green_flag_clicked {
            self.exec.green_flag_clicked = false;
            self.start();
        }

        // events recorded since the previous tick arm their scripts now;
        // a broadcast never re-arms anything inside the tick that sent it
        if let Some(name) = self.exec.pending_broadcast.take() {
            if self.exec.running {
                self.arm_broadcast(&name);
            }
        }
        if self.exec.running {
            let newly_pressed: Vec<String> = self
                .input
                .pressed_keys
                .difference(&self.prev_keys)
                .cloned()
                .collect();
            for key in newly_pressed {
                self.arm_key(&key);
            }
        }
        self.prev_keys = self.input.pressed_keys.clone();

        if !self.exec.running {
            return;
        }
        if self.exec.paused {
            if self.exec.step_mode && self.exec.step_pending {
                self.exec.step_pending = false;
                self.step_single();
            }
            return;
        }

        self.run_contexts(dt);
        self.capture_pen();

        // every script done and no broadcast waiting: the run is over
        if self.exec.running
            && self.exec.pending_broadcast.is_none()
            && self.contexts.iter().all(|ctx| ctx.finished)
        {
            self.exec.running = false;
            log::info!("all scripts finished");
        }
        if !self.exec.running {
            self.contexts.clear();
        }

        // the watchdog measures dispatches within a single frame
        self.exec.watchdog = 0;
    }

    /// Give every context its turn, grouped so one sprite's instructions
    /// for the tick all run before the next sprite's.
    fn run_contexts(&mut self, dt: f32) {
        for sprite in 0..self.sprites.len() {
            // the watchdog bounds one sprite's turn, not the whole tick;
            // many busy sprites must not add up to a spurious trip
            self.exec.watchdog = 0;
            for ci in 0..self.contexts.len() {
                if self.contexts[ci].sprite != sprite {
                    continue;
                }
                if !self.exec.running {
                    return;
                }
                self.run_context(ci, dt);
            }
        }
    }

    fn run_context(&mut self, ci: usize, dt: f32) {
        let mut ctx = std::mem::take(&mut self.contexts[ci]);
        if ctx.finished {
            self.contexts[ci] = ctx;
            return;
        }

        // a question this context asked has been answered
        if ctx.ask_waiting {
            if self.exec.ask.is_some() {
                self.contexts[ci] = ctx;
                return;
            }
            ctx.ask_waiting = false;
            self.advance(&mut ctx);
        }

        // timed wait still counting down
        if let Some(timer) = ctx.wait_timer {
            let left = timer - dt;
            if left > 0.0 {
                ctx.wait_timer = Some(left);
                self.contexts[ci] = ctx;
                return;
            }
            ctx.wait_timer = None;
            self.advance(&mut ctx);
        }

        // wait-until polls its condition once per tick
        if ctx.waiting_until {
            let satisfied = match ctx.current() {
                Some(Block::WaitUntil(cond)) => {
                    let cond = cond.clone();
                    self.eval_expr(ctx.sprite, &cond).to_bool()
                }
                // counter moved off the block somehow; don't wait forever
                _ => true,
            };
            if !satisfied {
                self.contexts[ci] = ctx;
                return;
            }
            ctx.waiting_until = false;
            self.advance(&mut ctx);
        }

        let mut completed_top_level = 0;
        while self.exec.running
            && !ctx.finished
            && !ctx.is_waiting()
            && completed_top_level < FRAME_BUDGET
        {
            let at_top = ctx.at_top_level();
            match self.execute_one(&mut ctx) {
                Flow::Continue => {
                    if at_top {
                        completed_top_level += 1;
                    }
                }
                Flow::Suspended | Flow::Finished => break,
            }
        }
        if completed_top_level >= FRAME_BUDGET {
            // running out of budget is an implicit suspension
            self.exec.watchdog = 0;
        }
        self.contexts[ci] = ctx;
    }

    /// Step mode: release exactly one instruction of the first runnable
    /// context while paused.
    fn step_single(&mut self) {
        for ci in 0..self.contexts.len() {
            if self.contexts[ci].finished || self.contexts[ci].is_waiting() {
                continue;
            }
            let mut ctx = std::mem::take(&mut self.contexts[ci]);
            self.execute_one(&mut ctx);
            self.contexts[ci] = ctx;
            break;
        }
        self.capture_pen();
    }

    /// Follow the selected sprite with the pen layer: keep its stroke fed
    /// while the pen is down, close the stroke once it comes up.
    fn capture_pen(&mut self) {
        let Some(sp) = self.sprites.get(self.selected_sprite) else {
            return;
        };
        if sp.pen_down {
            self.pen_track_sprite(self.selected_sprite);
        } else if self.pen.is_drawing() {
            self.pen.close_stroke();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Expr;

    fn runtime_with_script(script: Vec<Block>) -> Runtime {
        let mut rt = Runtime::new(480.0, 360.0);
        let idx = rt.add_sprite("cat", 0.0, 0.0);
        rt.sprite_mut(idx).unwrap().scripts.push(script);
        rt
    }

    fn change_var(name: &str, by: f64) -> Block {
        Block::ChangeVariable {
            name: name.to_string(),
            value: Expr::number(by),
        }
    }

    #[test]
    fn speech_timer_clears_at_tick_start() {
        let mut rt = Runtime::new(480.0, 360.0);
        let idx = rt.add_sprite("cat", 0.0, 0.0);
        rt.sprite_mut(idx)
            .unwrap()
            .say("hi".to_string(), false, 0.5);
        rt.tick(0.25);
        assert!(rt.sprite(idx).unwrap().speech.is_some());
        rt.tick(0.25);
        assert!(rt.sprite(idx).unwrap().speech.is_none());
    }

    #[test]
    fn permanent_speech_survives_ticks() {
        let mut rt = Runtime::new(480.0, 360.0);
        let idx = rt.add_sprite("cat", 0.0, 0.0);
        rt.sprite_mut(idx)
            .unwrap()
            .say("hi".to_string(), false, -1.0);
        rt.tick(5.0);
        assert!(rt.sprite(idx).unwrap().speech.is_some());
    }

    #[test]
    fn green_flag_starts_on_next_tick() {
        let mut rt = runtime_with_script(vec![change_var("n", 1.0)]);
        rt.click_green_flag();
        assert!(!rt.is_running());
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 1.0);
    }

    #[test]
    fn budget_spreads_long_scripts_over_ticks() {
        let script: Vec<Block> = (0..250).map(|_| change_var("n", 1.0)).collect();
        let mut rt = runtime_with_script(script);
        rt.start();
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), FRAME_BUDGET as f64);
        assert!(rt.is_running());
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 250.0);
        assert!(!rt.is_running());
    }

    #[test]
    fn run_ends_when_every_script_finishes() {
        let mut rt = runtime_with_script(vec![change_var("n", 1.0)]);
        rt.start();
        assert!(rt.is_running());
        rt.tick(0.016);
        assert!(!rt.is_running());
    }

    #[test]
    fn wait_until_resumes_when_condition_turns_true() {
        let mut rt = runtime_with_script(vec![
            Block::WaitUntil(Expr::Variable("go".to_string())),
            change_var("n", 1.0),
        ]);
        rt.start();
        rt.tick(0.016);
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 0.0);
        rt.stage_mut()
            .set_variable("go", crate::value::Value::Number(1.0));
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 1.0);
    }

    #[test]
    fn key_press_edge_arms_scripts_while_running() {
        let mut rt = Runtime::new(480.0, 360.0);
        let idx = rt.add_sprite("cat", 0.0, 0.0);
        rt.sprite_mut(idx).unwrap().scripts.push(vec![
            Block::WhenKeyPressed("space".to_string()),
            change_var("n", 1.0),
        ]);
        // keep one script alive so the run does not end immediately
        rt.sprite_mut(idx)
            .unwrap()
            .scripts
            .push(vec![Block::Wait(Expr::number(60.0))]);
        rt.start();
        rt.tick(0.016);

        let mut keys = std::collections::HashSet::new();
        keys.insert("space".to_string());
        rt.set_input_snapshot(0.0, 0.0, false, keys.clone());
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 1.0);

        // held key does not re-arm
        rt.set_input_snapshot(0.0, 0.0, false, keys);
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 1.0);
    }

    #[test]
    fn paused_step_mode_releases_one_instruction() {
        let mut rt = runtime_with_script(vec![
            change_var("n", 1.0),
            change_var("n", 1.0),
            change_var("n", 1.0),
        ]);
        rt.start();
        rt.pause();
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 0.0);
        rt.step_once();
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 1.0);
        rt.step_once();
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 2.0);
        rt.resume();
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 3.0);
    }

    #[test]
    fn stopped_contexts_are_discarded_at_the_tick_boundary() {
        let mut rt = runtime_with_script(vec![
            change_var("n", 1.0),
            Block::StopAll,
            change_var("n", 1.0),
        ]);
        rt.start();
        rt.tick(0.016);
        assert_eq!(rt.variable("n").to_number(), 1.0);
        assert!(!rt.is_running());
        assert!(rt.contexts.is_empty());
    }
}

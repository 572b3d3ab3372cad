use crate::block::Block;
use crate::interp::ExecCtx;
use crate::runtime::Runtime;

/// Arming: creating a fresh execution context at pc 0 for a script in
/// response to an event. Hat blocks at a script's head decide which event
/// arms it; a script with no hat runs on every start.
impl Runtime {
    pub(crate) fn arm_start_scripts(&mut self) {
        for sprite in 0..self.sprites.len() {
            for script in 0..self.sprites[sprite].scripts.len() {
                let armed = match self.sprites[sprite].scripts[script].first() {
                    Some(Block::WhenFlagClicked) => true,
                    Some(head) => !head.is_hat(),
                    None => false,
                };
                if armed {
                    self.arm(sprite, script);
                }
            }
        }
    }

    pub(crate) fn arm_broadcast(&mut self, name: &str) {
        for sprite in 0..self.sprites.len() {
            for script in 0..self.sprites[sprite].scripts.len() {
                let matches = matches!(
                    self.sprites[sprite].scripts[script].first(),
                    Some(Block::WhenBroadcast(n)) if n == name
                );
                if matches {
                    self.arm(sprite, script);
                }
            }
        }
    }

    pub(crate) fn arm_key(&mut self, key: &str) {
        for sprite in 0..self.sprites.len() {
            for script in 0..self.sprites[sprite].scripts.len() {
                let matches = matches!(
                    self.sprites[sprite].scripts[script].first(),
                    Some(Block::WhenKeyPressed(k)) if k == key
                );
                if matches {
                    self.arm(sprite, script);
                }
            }
        }
    }

    pub(crate) fn arm_sprite_click(&mut self, sprite: usize) {
        for script in 0..self.sprites[sprite].scripts.len() {
            if matches!(
                self.sprites[sprite].scripts[script].first(),
                Some(Block::WhenSpriteClicked)
            ) {
                self.arm(sprite, script);
            }
        }
    }

    fn arm(&mut self, sprite: usize, script: usize) {
        let snapshot = self.sprites[sprite].scripts[script].clone();
        self.contexts.push(ExecCtx::new(sprite, snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Expr;

    fn runtime_with_scripts() -> Runtime {
        let mut rt = Runtime::new(480.0, 360.0);
        let cat = rt.add_sprite("cat", 0.0, 0.0);
        let sp = rt.sprite_mut(cat).unwrap();
        sp.scripts.push(vec![Block::WhenFlagClicked, Block::Show]);
        sp.scripts.push(vec![Block::Show]); // bare script, runs on start
        sp.scripts
            .push(vec![Block::WhenBroadcast("go".to_string()), Block::Show]);
        sp.scripts.push(vec![
            Block::WhenKeyPressed("space".to_string()),
            Block::Show,
        ]);
        sp.scripts.push(vec![Block::WhenSpriteClicked, Block::Show]);
        rt
    }

    #[test]
    fn start_arms_flag_and_bare_scripts() {
        let mut rt = runtime_with_scripts();
        rt.arm_start_scripts();
        assert_eq!(rt.contexts.len(), 2);
        assert!(rt.contexts.iter().all(|c| c.pc == 0 && !c.finished));
    }

    #[test]
    fn broadcast_arms_matching_name_only() {
        let mut rt = runtime_with_scripts();
        rt.arm_broadcast("go");
        assert_eq!(rt.contexts.len(), 1);
        rt.arm_broadcast("other");
        assert_eq!(rt.contexts.len(), 1);
    }

    #[test]
    fn key_and_click_arming() {
        let mut rt = runtime_with_scripts();
        rt.arm_key("space");
        assert_eq!(rt.contexts.len(), 1);
        rt.arm_key("x");
        assert_eq!(rt.contexts.len(), 1);
        rt.arm_sprite_click(0);
        assert_eq!(rt.contexts.len(), 2);
    }

    #[test]
    fn arming_snapshots_the_script() {
        let mut rt = runtime_with_scripts();
        rt.arm_start_scripts();
        // editing the sprite's script must not disturb the armed copy
        rt.sprite_mut(0).unwrap().scripts[1] = vec![Block::Move(Expr::number(5.0))];
        assert_eq!(rt.contexts[1].script, vec![Block::Show]);
    }
}

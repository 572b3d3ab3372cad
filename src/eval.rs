use rand::Rng;

use crate::block::{BinaryOp, Expr, MathOp};
use crate::runtime::Runtime;
use crate::stage::is_valid_key;
use crate::value::Value;

impl Runtime {
    /// Evaluate a reporter for one sprite. Never mutates runtime state;
    /// user-program mistakes (divide by zero, unknown names) fall back to
    /// safe defaults with a logged warning.
    pub fn eval_expr(&self, sprite: usize, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Variable(name) => self.stage.variable(name),
            Expr::Binary { op, left, right } => {
                let l = self.eval_expr(sprite, left);
                let r = self.eval_expr(sprite, right);
                apply_binary(*op, &l, &r)
            }
            Expr::Not(inner) => Value::Bool(!self.eval_expr(sprite, inner).to_bool()),
            Expr::Math { op, arg } => {
                Value::Number(apply_math(*op, self.eval_expr(sprite, arg).to_number()))
            }
            Expr::Random { min, max } => {
                let a = self.eval_expr(sprite, min).to_number();
                let b = self.eval_expr(sprite, max).to_number();
                let (lo, hi) = (a.min(b), a.max(b));
                if hi > lo {
                    Value::Number(rand::thread_rng().gen_range(lo..hi))
                } else {
                    Value::Number(lo)
                }
            }
            Expr::Join { left, right } => {
                let mut s = self.eval_expr(sprite, left).to_text();
                s.push_str(&self.eval_expr(sprite, right).to_text());
                Value::Text(s)
            }
            Expr::LetterOf { index, text } => {
                let i = self.eval_expr(sprite, index).to_number().floor();
                let s = self.eval_expr(sprite, text).to_text();
                // 1-indexed; out of range reads as the empty string
                let letter = if i >= 1.0 {
                    s.chars().nth(i as usize - 1)
                } else {
                    None
                };
                Value::Text(letter.map(String::from).unwrap_or_default())
            }
            Expr::LengthOf(inner) => {
                Value::Number(self.eval_expr(sprite, inner).to_text().chars().count() as f64)
            }
            Expr::MouseX => Value::Number(self.mouse_stage_pos().0 as f64),
            Expr::MouseY => Value::Number(self.mouse_stage_pos().1 as f64),
            Expr::MouseDown => Value::Bool(self.input.mouse_down),
            Expr::KeyPressed(name) => {
                if !is_valid_key(name) {
                    log::warn!("unknown key name \"{}\" treated as not pressed", name);
                    return Value::Bool(false);
                }
                Value::Bool(self.input.pressed_keys.contains(name))
            }
            Expr::Timer => Value::Number(self.exec.global_timer as f64),
            Expr::Touching(target) => Value::Bool(self.touching(sprite, target)),
            Expr::DistanceTo(target) => Value::Number(self.distance_to(sprite, target)),
            Expr::Answer => Value::Text(
                self.sprites
                    .get(sprite)
                    .map(|sp| sp.answer.clone())
                    .unwrap_or_default(),
            ),
        }
    }

    fn touching(&self, sprite: usize, target: &str) -> bool {
        let Some(sp) = self.sprites.get(sprite) else {
            return false;
        };
        match target {
            "edge" => {
                let hw = self.stage.half_width();
                let hh = self.stage.half_height();
                sp.x <= -hw || sp.x >= hw || sp.y <= -hh || sp.y >= hh
            }
            "mouse pointer" => {
                let (mx, my) = self.mouse_stage_pos();
                distance(sp.x, sp.y, mx, my) <= sp.radius()
            }
            name => match self.sprites.iter().position(|other| other.name == name) {
                Some(j) if j != sprite => {
                    let other = &self.sprites[j];
                    distance(sp.x, sp.y, other.x, other.y) <= sp.radius() + other.radius()
                }
                Some(_) => false,
                None => {
                    log::warn!("touching target \"{}\" does not exist", name);
                    false
                }
            },
        }
    }

    fn distance_to(&self, sprite: usize, target: &str) -> f64 {
        let Some(sp) = self.sprites.get(sprite) else {
            return 0.0;
        };
        match target {
            "mouse pointer" => {
                let (mx, my) = self.mouse_stage_pos();
                distance(sp.x, sp.y, mx, my) as f64
            }
            name => match self.sprites.iter().find(|other| other.name == name) {
                Some(other) => distance(sp.x, sp.y, other.x, other.y) as f64,
                None => {
                    log::warn!("distance target \"{}\" does not exist", name);
                    0.0
                }
            },
        }
    }
}

fn distance(x0: f32, y0: f32, x1: f32, y1: f32) -> f32 {
    let dx = x1 - x0;
    let dy = y1 - y0;
    (dx * dx + dy * dy).sqrt()
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => Value::Number(left.to_number() + right.to_number()),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => {
            let b = right.to_number();
            if b == 0.0 {
                log::warn!("division by zero, result is 0");
                Value::Number(0.0)
            } else {
                Value::Number(left.to_number() / b)
            }
        }
        BinaryOp::Mod => {
            let a = left.to_number();
            let b = right.to_number();
            if b == 0.0 {
                log::warn!("modulo by zero, result is 0");
                Value::Number(0.0)
            } else {
                // remainder carries the divisor's sign
                let r = a % b;
                if r != 0.0 && (r < 0.0) != (b < 0.0) {
                    Value::Number(r + b)
                } else {
                    Value::Number(r)
                }
            }
        }
        BinaryOp::Less => Value::Bool(left.loose_lt(right)),
        BinaryOp::Equal => Value::Bool(left.loose_eq(right)),
        BinaryOp::Greater => Value::Bool(left.loose_gt(right)),
        BinaryOp::And => Value::Bool(left.to_bool() && right.to_bool()),
        BinaryOp::Or => Value::Bool(left.to_bool() || right.to_bool()),
    }
}

fn apply_math(op: MathOp, x: f64) -> f64 {
    match op {
        MathOp::Abs => x.abs(),
        MathOp::Sqrt => {
            if x < 0.0 {
                log::warn!("sqrt of a negative number, result is 0");
                0.0
            } else {
                x.sqrt()
            }
        }
        MathOp::Floor => x.floor(),
        MathOp::Ceiling => x.ceil(),
        MathOp::Round => x.round(),
        MathOp::Sin => x.to_radians().sin(),
        MathOp::Cos => x.to_radians().cos(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn runtime() -> Runtime {
        let mut rt = Runtime::new(480.0, 360.0);
        rt.add_sprite("cat", 0.0, 0.0);
        rt
    }

    fn num(rt: &Runtime, expr: &Expr) -> f64 {
        rt.eval_expr(0, expr).to_number()
    }

    #[test]
    fn arithmetic() {
        let rt = runtime();
        let e = Expr::binary(BinaryOp::Add, Expr::number(2.0), Expr::text("3"));
        assert_eq!(num(&rt, &e), 5.0);
        let e = Expr::binary(BinaryOp::Mul, Expr::number(4.0), Expr::number(2.5));
        assert_eq!(num(&rt, &e), 10.0);
    }

    #[test]
    fn division_by_zero_is_zero() {
        let rt = runtime();
        let e = Expr::binary(BinaryOp::Div, Expr::number(7.0), Expr::number(0.0));
        assert_eq!(num(&rt, &e), 0.0);
        let e = Expr::binary(BinaryOp::Mod, Expr::number(7.0), Expr::number(0.0));
        assert_eq!(num(&rt, &e), 0.0);
    }

    #[test]
    fn modulo_takes_divisor_sign() {
        let rt = runtime();
        let e = Expr::binary(BinaryOp::Mod, Expr::number(-7.0), Expr::number(3.0));
        assert_eq!(num(&rt, &e), 2.0);
        let e = Expr::binary(BinaryOp::Mod, Expr::number(7.0), Expr::number(-3.0));
        assert_eq!(num(&rt, &e), -2.0);
    }

    #[test]
    fn math_safeguards() {
        let rt = runtime();
        let e = Expr::Math {
            op: MathOp::Sqrt,
            arg: Box::new(Expr::number(-4.0)),
        };
        assert_eq!(num(&rt, &e), 0.0);
        let e = Expr::Math {
            op: MathOp::Cos,
            arg: Box::new(Expr::number(60.0)),
        };
        assert!((num(&rt, &e) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn random_stays_in_range() {
        let rt = runtime();
        let e = Expr::Random {
            min: Box::new(Expr::number(10.0)),
            max: Box::new(Expr::number(1.0)),
        };
        for _ in 0..50 {
            let v = num(&rt, &e);
            assert!((1.0..10.0).contains(&v));
        }
        let degenerate = Expr::Random {
            min: Box::new(Expr::number(4.0)),
            max: Box::new(Expr::number(4.0)),
        };
        assert_eq!(num(&rt, &degenerate), 4.0);
    }

    #[test]
    fn comparisons_pick_numeric_or_textual() {
        let rt = runtime();
        let e = Expr::binary(BinaryOp::Less, Expr::text("9"), Expr::text("10"));
        assert!(rt.eval_expr(0, &e).to_bool());
        let e = Expr::binary(BinaryOp::Greater, Expr::text("apple"), Expr::text("pear"));
        assert!(!rt.eval_expr(0, &e).to_bool());
        let e = Expr::binary(BinaryOp::Equal, Expr::number(0.5), Expr::text("0.5"));
        assert!(rt.eval_expr(0, &e).to_bool());
    }

    #[test]
    fn string_reporters() {
        let rt = runtime();
        let e = Expr::Join {
            left: Box::new(Expr::text("Hi ")),
            right: Box::new(Expr::number(5.0)),
        };
        assert_eq!(rt.eval_expr(0, &e).to_text(), "Hi 5");
        let e = Expr::LetterOf {
            index: Box::new(Expr::number(2.0)),
            text: Box::new(Expr::text("cat")),
        };
        assert_eq!(rt.eval_expr(0, &e).to_text(), "a");
        let e = Expr::LetterOf {
            index: Box::new(Expr::number(9.0)),
            text: Box::new(Expr::text("cat")),
        };
        assert_eq!(rt.eval_expr(0, &e).to_text(), "");
        let e = Expr::LengthOf(Box::new(Expr::text("piano")));
        assert_eq!(num(&rt, &e), 5.0);
    }

    #[test]
    fn missing_variable_is_zero() {
        let rt = runtime();
        assert_eq!(num(&rt, &Expr::Variable("ghostly".to_string())), 0.0);
    }

    #[test]
    fn key_sensing_validates_names() {
        let mut rt = runtime();
        let mut keys = HashSet::new();
        keys.insert("space".to_string());
        rt.set_input_snapshot(0.0, 0.0, false, keys);
        let pressed = Expr::KeyPressed("space".to_string());
        assert!(rt.eval_expr(0, &pressed).to_bool());
        let bogus = Expr::KeyPressed("Escape".to_string());
        assert!(!rt.eval_expr(0, &bogus).to_bool());
    }

    #[test]
    fn touching_edge_uses_clamped_bounds() {
        let mut rt = runtime();
        assert!(!rt.eval_expr(0, &Expr::Touching("edge".to_string())).to_bool());
        rt.sprite_mut(0).unwrap().x = 240.0;
        assert!(rt.eval_expr(0, &Expr::Touching("edge".to_string())).to_bool());
    }

    #[test]
    fn sprite_distance_and_touching() {
        let mut rt = runtime();
        rt.add_sprite("dog", 40.0, 0.0);
        let e = Expr::DistanceTo("dog".to_string());
        assert_eq!(num(&rt, &e), 40.0);
        // default radii are 30 + 30, so 40 apart means overlapping
        assert!(rt.eval_expr(0, &Expr::Touching("dog".to_string())).to_bool());
        rt.sprite_mut(1).unwrap().x = 100.0;
        assert!(!rt.eval_expr(0, &Expr::Touching("dog".to_string())).to_bool());
        // unknown names fall back to safe defaults
        assert_eq!(num(&rt, &Expr::DistanceTo("bird".to_string())), 0.0);
    }

    #[test]
    fn mouse_sensors_report_stage_coords() {
        let mut rt = runtime();
        rt.set_input_snapshot(240.0, 180.0, true, HashSet::new());
        assert_eq!(num(&rt, &Expr::MouseX), 0.0);
        assert_eq!(num(&rt, &Expr::MouseY), 0.0);
        assert!(rt.eval_expr(0, &Expr::MouseDown).to_bool());
    }
}

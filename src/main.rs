use blockstage::{Block, Expr, Runtime, DEFAULT_STAGE_HEIGHT, DEFAULT_STAGE_WIDTH};

fn main() {
    env_logger::init();

    println!("Starting blockstage headless demo...");

    let mut rt = Runtime::new(DEFAULT_STAGE_WIDTH, DEFAULT_STAGE_HEIGHT);

    // A sprite that draws a square with the pen, counts its laps and tells
    // everyone when it is done.
    let scribe = rt.add_sprite("Scribe", 0.0, 0.0);
    rt.sprite_mut(scribe).unwrap().scripts.push(vec![
        Block::SetPenColor { r: 255, g: 128, b: 0 },
        Block::PenDown,
        Block::Repeat {
            count: Expr::number(4.0),
            body: vec![
                Block::Move(Expr::number(80.0)),
                Block::TurnRight(Expr::number(90.0)),
                Block::ChangeVariable {
                    name: "sides".to_string(),
                    value: Expr::number(1.0),
                },
            ],
        },
        Block::PenUp,
        Block::Broadcast("square done".to_string()),
    ]);

    // A second sprite that reacts to the broadcast.
    let echo = rt.add_sprite("Echo", 100.0, 50.0);
    rt.sprite_mut(echo).unwrap().scripts.push(vec![
        Block::WhenBroadcast("square done".to_string()),
        Block::Say(Expr::text("nice square!")),
    ]);

    rt.click_green_flag();
    for _ in 0..180 {
        rt.tick(1.0 / 60.0);
        if !rt.is_running() {
            break;
        }
    }

    println!("Run finished after {:.2}s of stage time", rt.timer());
    println!("Pen layer holds {} stroke(s)", rt.pen_strokes().len());
    if let Some(stroke) = rt.pen_strokes().first() {
        println!("  first stroke has {} point(s)", stroke.points.len());
    }
    for sp in rt.sprites() {
        print!(
            "{} at ({:.1}, {:.1}) facing {:.0}",
            sp.name, sp.x, sp.y, sp.direction
        );
        match &sp.speech {
            Some(speech) => println!(", saying \"{}\"", speech.text),
            None => println!(),
        }
    }
    for (name, value) in rt.variables() {
        println!("variable {} = {}", name, value.to_text());
    }
}

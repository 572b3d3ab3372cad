pub mod block;
pub mod diag;
pub mod eval;
pub mod events;
pub mod interp;
pub mod pen;
pub mod runtime;
pub mod scheduler;
pub mod sound;
pub mod sprite;
pub mod stage;
pub mod value;

pub use block::{BinaryOp, Block, Effect, Expr, MathOp, Script};
pub use diag::{Diagnostic, Severity};
pub use interp::{ExecCtx, Flow, FrameKind, LoopFrame, WATCHDOG_LIMIT};
pub use pen::{PenLayer, PenStroke};
pub use runtime::{AskRequest, ExecState, Runtime};
pub use scheduler::FRAME_BUDGET;
pub use sound::SoundCommand;
pub use sprite::{Speech, Sprite};
pub use stage::{is_valid_key, InputSnapshot, Stage, DEFAULT_STAGE_HEIGHT, DEFAULT_STAGE_WIDTH};
pub use value::Value;

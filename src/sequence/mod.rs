pub mod parser;
pub mod types;
pub mod utils;

pub use parser::ParseError;
pub use types::{
    CalibrationFrame, CalibrationSettings, CaptureSettings, DitherSettings, FilterSettings,
    FocusMode, FocusSettings, OnFail, Sequence, SlewSettings, Step, StepKind, StepSettings,
    StepStatus, WaitSettings,
};
